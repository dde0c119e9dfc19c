use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub routing: RoutingConfig,
    pub resilience: ResilienceConfig,
    pub classifier: ClassifierConfig,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoutingConfig {
    pub max_reasoning_steps: usize,
    pub max_recovery_attempts: u32,
    pub min_confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResilienceConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub call_timeout_ms: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassifierConfig {
    pub enabled: bool,
    pub cache_prefix: String,
    pub cache_ttl_secs: u64,
    pub max_query_chars: usize,
    pub price_per_1k_tokens_usd: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogConfig {
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub catalog_path: Option<PathBuf>,
    pub max_reasoning_steps: Option<usize>,
    pub classifier_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self { max_reasoning_steps: 10, max_recovery_attempts: 3, min_confidence: 0.5 }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 60,
            max_retries: 2,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            call_timeout_ms: 30_000,
        }
    }
}

impl ResilienceConfig {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_prefix: "classify:".to_string(),
            cache_ttl_secs: 7 * 24 * 60 * 60,
            max_query_chars: 500,
            price_per_1k_tokens_usd: 0.000_15,
        }
    }
}

impl ClassifierConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
            },
            routing: RoutingConfig::default(),
            resilience: ResilienceConfig::default(),
            classifier: ClassifierConfig::default(),
            catalog: CatalogConfig { path: PathBuf::from("config/catalog.toml") },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("helmsman.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(max_reasoning_steps) = routing.max_reasoning_steps {
                self.routing.max_reasoning_steps = max_reasoning_steps;
            }
            if let Some(max_recovery_attempts) = routing.max_recovery_attempts {
                self.routing.max_recovery_attempts = max_recovery_attempts;
            }
            if let Some(min_confidence) = routing.min_confidence {
                self.routing.min_confidence = min_confidence;
            }
        }

        if let Some(resilience) = patch.resilience {
            if let Some(failure_threshold) = resilience.failure_threshold {
                self.resilience.failure_threshold = failure_threshold;
            }
            if let Some(cooldown_secs) = resilience.cooldown_secs {
                self.resilience.cooldown_secs = cooldown_secs;
            }
            if let Some(max_retries) = resilience.max_retries {
                self.resilience.max_retries = max_retries;
            }
            if let Some(base_delay_ms) = resilience.base_delay_ms {
                self.resilience.base_delay_ms = base_delay_ms;
            }
            if let Some(max_delay_ms) = resilience.max_delay_ms {
                self.resilience.max_delay_ms = max_delay_ms;
            }
            if let Some(call_timeout_ms) = resilience.call_timeout_ms {
                self.resilience.call_timeout_ms = call_timeout_ms;
            }
        }

        if let Some(classifier) = patch.classifier {
            if let Some(enabled) = classifier.enabled {
                self.classifier.enabled = enabled;
            }
            if let Some(cache_prefix) = classifier.cache_prefix {
                self.classifier.cache_prefix = cache_prefix;
            }
            if let Some(cache_ttl_secs) = classifier.cache_ttl_secs {
                self.classifier.cache_ttl_secs = cache_ttl_secs;
            }
            if let Some(max_query_chars) = classifier.max_query_chars {
                self.classifier.max_query_chars = max_query_chars;
            }
            if let Some(price) = classifier.price_per_1k_tokens_usd {
                self.classifier.price_per_1k_tokens_usd = price;
            }
        }

        if let Some(catalog) = patch.catalog {
            if let Some(path) = catalog.path {
                self.catalog.path = path;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("HELMSMAN_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("HELMSMAN_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("HELMSMAN_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("HELMSMAN_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("HELMSMAN_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("HELMSMAN_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("HELMSMAN_ROUTING_MAX_REASONING_STEPS") {
            self.routing.max_reasoning_steps =
                parse_env("HELMSMAN_ROUTING_MAX_REASONING_STEPS", &value)?;
        }
        if let Some(value) = read_env("HELMSMAN_ROUTING_MAX_RECOVERY_ATTEMPTS") {
            self.routing.max_recovery_attempts =
                parse_env("HELMSMAN_ROUTING_MAX_RECOVERY_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("HELMSMAN_ROUTING_MIN_CONFIDENCE") {
            self.routing.min_confidence = parse_env("HELMSMAN_ROUTING_MIN_CONFIDENCE", &value)?;
        }

        if let Some(value) = read_env("HELMSMAN_RESILIENCE_FAILURE_THRESHOLD") {
            self.resilience.failure_threshold =
                parse_env("HELMSMAN_RESILIENCE_FAILURE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("HELMSMAN_RESILIENCE_COOLDOWN_SECS") {
            self.resilience.cooldown_secs = parse_env("HELMSMAN_RESILIENCE_COOLDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("HELMSMAN_RESILIENCE_MAX_RETRIES") {
            self.resilience.max_retries = parse_env("HELMSMAN_RESILIENCE_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("HELMSMAN_RESILIENCE_BASE_DELAY_MS") {
            self.resilience.base_delay_ms = parse_env("HELMSMAN_RESILIENCE_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("HELMSMAN_RESILIENCE_MAX_DELAY_MS") {
            self.resilience.max_delay_ms = parse_env("HELMSMAN_RESILIENCE_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("HELMSMAN_RESILIENCE_CALL_TIMEOUT_MS") {
            self.resilience.call_timeout_ms =
                parse_env("HELMSMAN_RESILIENCE_CALL_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("HELMSMAN_CLASSIFIER_ENABLED") {
            self.classifier.enabled = parse_env("HELMSMAN_CLASSIFIER_ENABLED", &value)?;
        }
        if let Some(value) = read_env("HELMSMAN_CLASSIFIER_CACHE_TTL_SECS") {
            self.classifier.cache_ttl_secs =
                parse_env("HELMSMAN_CLASSIFIER_CACHE_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("HELMSMAN_CLASSIFIER_MAX_QUERY_CHARS") {
            self.classifier.max_query_chars =
                parse_env("HELMSMAN_CLASSIFIER_MAX_QUERY_CHARS", &value)?;
        }

        if let Some(value) = read_env("HELMSMAN_CATALOG_PATH") {
            self.catalog.path = PathBuf::from(value);
        }

        let log_level =
            read_env("HELMSMAN_LOGGING_LEVEL").or_else(|| read_env("HELMSMAN_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("HELMSMAN_LOGGING_FORMAT").or_else(|| read_env("HELMSMAN_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(catalog_path) = overrides.catalog_path {
            self.catalog.path = catalog_path;
        }
        if let Some(max_reasoning_steps) = overrides.max_reasoning_steps {
            self.routing.max_reasoning_steps = max_reasoning_steps;
        }
        if let Some(enabled) = overrides.classifier_enabled {
            self.classifier.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm, self.classifier.enabled)?;
        validate_routing(&self.routing)?;
        validate_resilience(&self.resilience)?;
        validate_classifier(&self.classifier)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("helmsman.toml"), PathBuf::from("config/helmsman.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

/// Provider credentials only matter when the classifier will actually call a model.
fn validate_llm(llm: &LlmConfig, classifier_enabled: bool) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if !classifier_enabled {
        return Ok(());
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_routing(routing: &RoutingConfig) -> Result<(), ConfigError> {
    if routing.max_reasoning_steps == 0 {
        return Err(ConfigError::Validation(
            "routing.max_reasoning_steps must be greater than zero".to_string(),
        ));
    }
    if routing.max_recovery_attempts == 0 {
        return Err(ConfigError::Validation(
            "routing.max_recovery_attempts must be greater than zero".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&routing.min_confidence) {
        return Err(ConfigError::Validation(
            "routing.min_confidence must be in range 0.0..=1.0".to_string(),
        ));
    }
    Ok(())
}

fn validate_resilience(resilience: &ResilienceConfig) -> Result<(), ConfigError> {
    if resilience.failure_threshold == 0 {
        return Err(ConfigError::Validation(
            "resilience.failure_threshold must be greater than zero".to_string(),
        ));
    }
    if resilience.cooldown_secs == 0 {
        return Err(ConfigError::Validation(
            "resilience.cooldown_secs must be greater than zero".to_string(),
        ));
    }
    if resilience.base_delay_ms > resilience.max_delay_ms {
        return Err(ConfigError::Validation(
            "resilience.base_delay_ms must not exceed resilience.max_delay_ms".to_string(),
        ));
    }
    if resilience.call_timeout_ms == 0 || resilience.call_timeout_ms > 300_000 {
        return Err(ConfigError::Validation(
            "resilience.call_timeout_ms must be in range 1..=300000".to_string(),
        ));
    }
    Ok(())
}

fn validate_classifier(classifier: &ClassifierConfig) -> Result<(), ConfigError> {
    if classifier.cache_prefix.trim().is_empty() {
        return Err(ConfigError::Validation(
            "classifier.cache_prefix must not be empty".to_string(),
        ));
    }
    if classifier.max_query_chars == 0 {
        return Err(ConfigError::Validation(
            "classifier.max_query_chars must be greater than zero".to_string(),
        ));
    }
    if !classifier.price_per_1k_tokens_usd.is_finite() || classifier.price_per_1k_tokens_usd < 0.0
    {
        return Err(ConfigError::Validation(
            "classifier.price_per_1k_tokens_usd must be a non-negative number".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    routing: Option<RoutingPatch>,
    resilience: Option<ResiliencePatch>,
    classifier: Option<ClassifierPatch>,
    catalog: Option<CatalogPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    max_reasoning_steps: Option<usize>,
    max_recovery_attempts: Option<u32>,
    min_confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ResiliencePatch {
    failure_threshold: Option<u32>,
    cooldown_secs: Option<u64>,
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    call_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ClassifierPatch {
    enabled: Option<bool>,
    cache_prefix: Option<String>,
    cache_ttl_secs: Option<u64>,
    max_query_chars: Option<usize>,
    price_per_1k_tokens_usd: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogPatch {
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
