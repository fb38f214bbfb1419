use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use switchboard_core::config::{LoadOptions, SwitchboardConfig, CONFIG_FILE_CANDIDATES};
use toml::Value;

/// Settings accepted for a live completion client but not read by the
/// offline collaborators the CLI runs with.
const RESERVED_NOTE: &str = "reserved: no live completion client is wired";

/// One effective setting: dotted key, rendered value, and the env var that
/// can override it.
struct Setting {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
    note: Option<&'static str>,
}

pub fn run() -> String {
    let config = match SwitchboardConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for setting in settings(&config) {
        let source = field_source(
            setting.key,
            setting.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(setting.key, &setting.value, source, setting.note));
    }

    lines.join("\n")
}

fn settings(config: &SwitchboardConfig) -> Vec<Setting> {
    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    vec![
        Setting {
            key: "workflow.entry_handler",
            value: config.workflow.entry_handler.clone(),
            env_keys: &["SWITCHBOARD_WORKFLOW_ENTRY_HANDLER"],
            note: None,
        },
        Setting {
            key: "workflow.escalation_handler",
            value: config.workflow.escalation_handler.clone(),
            env_keys: &["SWITCHBOARD_WORKFLOW_ESCALATION_HANDLER"],
            note: None,
        },
        Setting {
            key: "workflow.max_turns",
            value: config.workflow.max_turns.to_string(),
            env_keys: &["SWITCHBOARD_WORKFLOW_MAX_TURNS"],
            note: None,
        },
        Setting {
            key: "workflow.allow_revisits",
            value: config.workflow.allow_revisits.to_string(),
            env_keys: &["SWITCHBOARD_WORKFLOW_ALLOW_REVISITS"],
            note: None,
        },
        Setting {
            key: "escalation.confidence_threshold",
            value: config.escalation.confidence_threshold.to_string(),
            env_keys: &["SWITCHBOARD_ESCALATION_CONFIDENCE_THRESHOLD"],
            note: None,
        },
        Setting {
            key: "escalation.negative_sentiment_threshold",
            value: config.escalation.negative_sentiment_threshold.to_string(),
            env_keys: &["SWITCHBOARD_ESCALATION_NEGATIVE_SENTIMENT_THRESHOLD"],
            note: None,
        },
        Setting {
            key: "escalation.escalate_general_inquiry",
            value: config.escalation.escalate_general_inquiry.to_string(),
            env_keys: &["SWITCHBOARD_ESCALATION_GENERAL_INQUIRY"],
            note: None,
        },
        Setting {
            key: "llm.api_key",
            value: api_key,
            env_keys: &["SWITCHBOARD_LLM_API_KEY"],
            note: Some(RESERVED_NOTE),
        },
        Setting {
            key: "llm.model",
            value: config.llm.model.clone(),
            env_keys: &["SWITCHBOARD_LLM_MODEL"],
            note: Some(RESERVED_NOTE),
        },
        Setting {
            key: "llm.timeout_secs",
            value: config.llm.timeout_secs.to_string(),
            env_keys: &["SWITCHBOARD_LLM_TIMEOUT_SECS"],
            note: None,
        },
        Setting {
            key: "llm.max_tokens",
            value: config.llm.max_tokens.to_string(),
            env_keys: &["SWITCHBOARD_LLM_MAX_TOKENS"],
            note: None,
        },
        Setting {
            key: "knowledge.search_limit",
            value: config.knowledge.search_limit.to_string(),
            env_keys: &["SWITCHBOARD_KNOWLEDGE_SEARCH_LIMIT"],
            note: None,
        },
        Setting {
            key: "knowledge.min_relevance",
            value: config.knowledge.min_relevance.to_string(),
            env_keys: &["SWITCHBOARD_KNOWLEDGE_MIN_RELEVANCE"],
            note: None,
        },
        Setting {
            key: "middleware.timing",
            value: config.middleware.timing.to_string(),
            env_keys: &["SWITCHBOARD_MIDDLEWARE_TIMING"],
            note: None,
        },
        Setting {
            key: "middleware.retry_max_attempts",
            value: config.middleware.retry_max_attempts.to_string(),
            env_keys: &["SWITCHBOARD_MIDDLEWARE_RETRY_MAX_ATTEMPTS"],
            note: None,
        },
        Setting {
            key: "middleware.retry_base_delay_ms",
            value: config.middleware.retry_base_delay_ms.to_string(),
            env_keys: &["SWITCHBOARD_MIDDLEWARE_RETRY_BASE_DELAY_MS"],
            note: None,
        },
        Setting {
            key: "middleware.cache_enabled",
            value: config.middleware.cache_enabled.to_string(),
            env_keys: &["SWITCHBOARD_MIDDLEWARE_CACHE_ENABLED"],
            note: None,
        },
        Setting {
            key: "middleware.cache_capacity",
            value: config.middleware.cache_capacity.to_string(),
            env_keys: &["SWITCHBOARD_MIDDLEWARE_CACHE_CAPACITY"],
            note: None,
        },
        Setting {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["SWITCHBOARD_LOGGING_LEVEL", "SWITCHBOARD_LOG_LEVEL"],
            note: None,
        },
        Setting {
            key: "logging.format",
            value: format!("{:?}", config.logging.format).to_ascii_lowercase(),
            env_keys: &["SWITCHBOARD_LOGGING_FORMAT", "SWITCHBOARD_LOG_FORMAT"],
            note: None,
        },
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let env_key = env_keys
        .iter()
        .find(|key| env::var(key).map(|value| !value.trim().is_empty()).unwrap_or(false));
    if let Some(env_key) = env_key {
        return format!("env ({env_key})");
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

fn render_line(key: &str, value: &str, source: String, note: Option<&str>) -> String {
    match note {
        Some(note) => format!("- {key} = {value} (source: {source}; {note})"),
        None => format!("- {key} = {value} (source: {source})"),
    }
}

fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_secret, render_line, RESERVED_NOTE};

    #[test]
    fn secrets_keep_only_their_prefix() {
        assert_eq!(redact_secret("sk-live-123"), "sk-***");
        assert_eq!(redact_secret("plainsecret"), "<redacted>");
        assert_eq!(redact_secret("  "), "<empty>");
    }

    #[test]
    fn reserved_settings_carry_their_note() {
        assert_eq!(
            render_line("llm.model", "support-large", "default".to_string(), Some(RESERVED_NOTE)),
            "- llm.model = support-large (source: default; reserved: no live completion client is wired)"
        );
        assert_eq!(
            render_line("workflow.max_turns", "5", "default".to_string(), None),
            "- workflow.max_turns = 5 (source: default)"
        );
    }

    #[test]
    fn nested_keys_are_found_in_toml() {
        let doc = "[workflow]\nmax_turns = 3\n".parse::<toml::Value>().expect("toml");
        assert!(contains_path(&doc, "workflow.max_turns"));
        assert!(!contains_path(&doc, "workflow.allow_revisits"));
    }
}
