use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use helmsman_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let api_key = match &config.llm.api_key {
        Some(key) => redact_token(key.expose_secret()),
        None => "<unset>".to_string(),
    };
    let fields: Vec<(&str, String, &str)> = vec![
        ("llm.provider", format!("{:?}", config.llm.provider), "HELMSMAN_LLM_PROVIDER"),
        ("llm.model", config.llm.model.clone(), "HELMSMAN_LLM_MODEL"),
        (
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            "HELMSMAN_LLM_BASE_URL",
        ),
        ("llm.api_key", api_key, "HELMSMAN_LLM_API_KEY"),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), "HELMSMAN_LLM_TIMEOUT_SECS"),
        (
            "routing.max_reasoning_steps",
            config.routing.max_reasoning_steps.to_string(),
            "HELMSMAN_ROUTING_MAX_REASONING_STEPS",
        ),
        (
            "routing.max_recovery_attempts",
            config.routing.max_recovery_attempts.to_string(),
            "HELMSMAN_ROUTING_MAX_RECOVERY_ATTEMPTS",
        ),
        (
            "routing.min_confidence",
            config.routing.min_confidence.to_string(),
            "HELMSMAN_ROUTING_MIN_CONFIDENCE",
        ),
        (
            "resilience.failure_threshold",
            config.resilience.failure_threshold.to_string(),
            "HELMSMAN_RESILIENCE_FAILURE_THRESHOLD",
        ),
        (
            "resilience.cooldown_secs",
            config.resilience.cooldown_secs.to_string(),
            "HELMSMAN_RESILIENCE_COOLDOWN_SECS",
        ),
        (
            "resilience.max_retries",
            config.resilience.max_retries.to_string(),
            "HELMSMAN_RESILIENCE_MAX_RETRIES",
        ),
        (
            "resilience.call_timeout_ms",
            config.resilience.call_timeout_ms.to_string(),
            "HELMSMAN_RESILIENCE_CALL_TIMEOUT_MS",
        ),
        (
            "classifier.enabled",
            config.classifier.enabled.to_string(),
            "HELMSMAN_CLASSIFIER_ENABLED",
        ),
        (
            "classifier.cache_ttl_secs",
            config.classifier.cache_ttl_secs.to_string(),
            "HELMSMAN_CLASSIFIER_CACHE_TTL_SECS",
        ),
        (
            "classifier.max_query_chars",
            config.classifier.max_query_chars.to_string(),
            "HELMSMAN_CLASSIFIER_MAX_QUERY_CHARS",
        ),
        ("catalog.path", config.catalog.path.display().to_string(), "HELMSMAN_CATALOG_PATH"),
        ("logging.level", config.logging.level.clone(), "HELMSMAN_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "HELMSMAN_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in fields {
        let source = field_source(
            key,
            Some(env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("helmsman.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/helmsman.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a recognizable provider prefix such as `sk-` and hides the rest.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
