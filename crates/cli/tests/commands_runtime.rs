use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use helmsman_cli::commands::check::CheckArgs;
use helmsman_cli::commands::route::RouteArgs;
use helmsman_cli::commands::{check, config, route};
use helmsman_core::domain::tool::{CostClass, ToolCategory};
use serde_json::Value;
use tempfile::TempDir;

const CATALOG: &str = r#"
[[tools]]
id = "route_calculator"
name = "Route calculator"
description = "Sea route and distance between two ports"
category = "calculation"
cost = "free"

[[tools]]
id = "price_fetch"
name = "Bunker prices"
description = "Latest bunker prices per port"
category = "data_fetch"
cost = "api_call"
metrics = { total_calls = 4, success_calls = 3, failure_calls = 1 }

[[tools]]
id = "legacy_prices"
name = "Legacy prices"
description = "Old price feed"
category = "data_fetch"
cost = "api_call"
deprecated = true
replaced_by = "price_fetch"

[[capabilities]]
id = "route_agent"
description = "voyage routes and distances"
keywords = ["route", "distance", "voyage"]
output_key = "route"
tools = { required = ["route_calculator"] }

[[capabilities]]
id = "bunker_agent"
description = "bunker fuel prices"
keywords = ["bunker", "fuel", "cheapest"]
output_key = "bunker"
tools = { required = ["price_fetch"] }
dependencies = { upstream = ["route_agent"] }
"#;

const CYCLIC_CATALOG: &str = r#"
[[capabilities]]
id = "alpha_agent"
dependencies = { upstream = ["beta_agent"] }

[[capabilities]]
id = "beta_agent"
dependencies = { upstream = ["alpha_agent"] }
"#;

#[test]
fn check_reports_catalog_summary() {
    let (_dir, path) = write_catalog(CATALOG);
    with_env(&[], || {
        let result = check::run(&checking(&path));
        assert_eq!(result.exit_code, 0, "expected valid catalog: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "check");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"]["tools"], 3);
        assert_eq!(payload["data"]["capabilities"][1], "bunker_agent");
        assert_eq!(payload["data"]["deprecated_tools"][0], "legacy_prices");
        assert_eq!(payload["data"]["ordering"][0], "route_agent -> bunker_agent");
    });
}

#[test]
fn check_filters_tool_health_by_category_and_cost() {
    let (_dir, path) = write_catalog(CATALOG);
    with_env(&[], || {
        let result = check::run(&CheckArgs {
            category: Some(ToolCategory::DataFetch),
            cost: Some(CostClass::ApiCall),
            ..checking(&path)
        });
        let payload = parse_payload(&result.output);
        let health = payload["data"]["tool_health"].as_array().expect("tool health");
        assert_eq!(health.len(), 2);
        assert_eq!(health[0]["id"], "legacy_prices");
        assert_eq!(health[1]["id"], "price_fetch");
        assert_eq!(health[1]["cost"], "api_call");
        assert_eq!(health[1]["success_rate"], 0.75);

        let result = check::run(&CheckArgs {
            category: Some(ToolCategory::Calculation),
            ..checking(&path)
        });
        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["tool_health"][0]["id"], "route_calculator");
        assert!(payload["data"]["tool_health"][0]["success_rate"].is_null());
        assert_eq!(payload["data"]["tools"], 3);
    });
}

#[test]
fn check_uses_catalog_path_from_environment() {
    let (_dir, path) = write_catalog(CATALOG);
    let path_value = path.display().to_string();
    with_env(&[("HELMSMAN_CATALOG_PATH", path_value.as_str())], || {
        let result = check::run(&CheckArgs::default());
        assert_eq!(result.exit_code, 0, "expected env catalog path: {}", result.output);
    });
}

#[test]
fn check_reports_dependency_cycle() {
    let (_dir, path) = write_catalog(CYCLIC_CATALOG);
    with_env(&[], || {
        let result = check::run(&checking(&path));
        assert_eq!(result.exit_code, 4);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "circular_dependency");
        assert!(payload["message"].as_str().unwrap_or_default().contains("alpha_agent"));
    });
}

#[test]
fn check_reports_missing_catalog() {
    let dir = TempDir::new().expect("temp dir");
    let missing = dir.path().join("absent.toml");
    with_env(&[], || {
        let result = check::run(&checking(&missing));
        assert_eq!(result.exit_code, 3);
        assert_eq!(parse_payload(&result.output)["error_class"], "catalog_source");
    });
}

#[test]
fn check_reports_invalid_environment() {
    let (_dir, path) = write_catalog(CATALOG);
    with_env(&[("HELMSMAN_ROUTING_MAX_REASONING_STEPS", "lots")], || {
        let result = check::run(&checking(&path));
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "config_validation");
    });
}

#[test]
fn route_calls_upstream_capability_first() {
    let (_dir, path) = write_catalog(CATALOG);
    with_env(&[], || {
        let result = route::run(&RouteArgs {
            query: "Find cheapest bunker from Singapore to Rotterdam".to_string(),
            catalog: Some(path.clone()),
            have: Vec::new(),
        });
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["action"], "call_agent");
        assert_eq!(payload["data"]["next_capability"], "route_agent");
        assert_eq!(payload["message"], "next capability: route_agent");
    });
}

#[test]
fn route_skips_capabilities_with_collected_data() {
    let (_dir, path) = write_catalog(CATALOG);
    with_env(&[], || {
        let result = route::run(&RouteArgs {
            query: "Find cheapest bunker from Singapore to Rotterdam".to_string(),
            catalog: Some(path.clone()),
            have: vec!["route_agent".to_string()],
        });
        assert_eq!(parse_payload(&result.output)["data"]["next_capability"], "bunker_agent");

        let result = route::run(&RouteArgs {
            query: "Find cheapest bunker from Singapore to Rotterdam".to_string(),
            catalog: Some(path.clone()),
            have: vec!["route_agent".to_string(), "bunker_agent".to_string()],
        });
        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["action"], "finalize");
        assert_eq!(payload["data"]["reason"], "data_complete");
    });
}

#[test]
fn route_rejects_unknown_collected_capability() {
    let (_dir, path) = write_catalog(CATALOG);
    with_env(&[], || {
        let result = route::run(&RouteArgs {
            query: "route please".to_string(),
            catalog: Some(path.clone()),
            have: vec!["ghost_agent".to_string()],
        });
        assert_eq!(result.exit_code, 5);
        assert_eq!(parse_payload(&result.output)["error_class"], "unknown_capability");
    });
}

#[test]
fn route_asks_for_clarification_when_nothing_matches() {
    let (_dir, path) = write_catalog(CATALOG);
    with_env(&[], || {
        let result = route::run(&RouteArgs {
            query: "tell me a joke".to_string(),
            catalog: Some(path.clone()),
            have: Vec::new(),
        });
        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["action"], "ask_clarification");
        assert_eq!(payload["data"]["needs_clarification"], true);
    });
}

#[test]
fn config_output_redacts_api_key_and_attributes_sources() {
    with_env(
        &[("HELMSMAN_LLM_PROVIDER", "openai"), ("HELMSMAN_LLM_API_KEY", "sk-very-secret")],
        || {
            let output = config::run();
            assert!(output.contains("- llm.api_key = sk-*** (source: env (HELMSMAN_LLM_API_KEY))"));
            assert!(!output.contains("very-secret"));
            assert!(output.contains("- routing.max_reasoning_steps = 10 (source: default)"));
        },
    );
}

fn checking(path: &Path) -> CheckArgs {
    CheckArgs { catalog: Some(path.to_path_buf()), ..CheckArgs::default() }
}

fn write_catalog(contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("catalog.toml");
    fs::write(&path, contents).expect("write catalog");
    (dir, path)
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "HELMSMAN_LLM_PROVIDER",
        "HELMSMAN_LLM_API_KEY",
        "HELMSMAN_LLM_BASE_URL",
        "HELMSMAN_LLM_MODEL",
        "HELMSMAN_LLM_TIMEOUT_SECS",
        "HELMSMAN_ROUTING_MAX_REASONING_STEPS",
        "HELMSMAN_ROUTING_MAX_RECOVERY_ATTEMPTS",
        "HELMSMAN_ROUTING_MIN_CONFIDENCE",
        "HELMSMAN_RESILIENCE_FAILURE_THRESHOLD",
        "HELMSMAN_RESILIENCE_COOLDOWN_SECS",
        "HELMSMAN_RESILIENCE_MAX_RETRIES",
        "HELMSMAN_RESILIENCE_BASE_DELAY_MS",
        "HELMSMAN_RESILIENCE_MAX_DELAY_MS",
        "HELMSMAN_RESILIENCE_CALL_TIMEOUT_MS",
        "HELMSMAN_CLASSIFIER_ENABLED",
        "HELMSMAN_CLASSIFIER_CACHE_TTL_SECS",
        "HELMSMAN_CLASSIFIER_MAX_QUERY_CHARS",
        "HELMSMAN_CATALOG_PATH",
        "HELMSMAN_LOGGING_LEVEL",
        "HELMSMAN_LOGGING_FORMAT",
        "HELMSMAN_LOG_LEVEL",
        "HELMSMAN_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}

#[test]
fn bundled_demo_catalog_is_valid() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/catalog.toml");
    with_env(&[], || {
        let result = check::run(&checking(&path));
        assert_eq!(result.exit_code, 0, "demo catalog should load: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["tools"], 6);
        assert_eq!(payload["data"]["capabilities"].as_array().map(Vec::len), Some(5));
    });
}
