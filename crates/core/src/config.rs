use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::conversation::DEFAULT_MAX_TURNS;
use crate::routing::escalation::EscalationPolicy;
use crate::routing::table::{RoutingTable, ESCALATION, ROUTER};

pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["switchboard.toml", "config/switchboard.toml"];

#[derive(Clone, Debug)]
pub struct SwitchboardConfig {
    pub workflow: WorkflowConfig,
    pub escalation: EscalationConfig,
    pub llm: LlmConfig,
    pub knowledge: KnowledgeConfig,
    pub middleware: MiddlewareConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub entry_handler: String,
    pub escalation_handler: String,
    pub max_turns: u32,
    pub allow_revisits: bool,
}

#[derive(Clone, Debug)]
pub struct EscalationConfig {
    pub confidence_threshold: f64,
    pub negative_sentiment_threshold: f64,
    pub escalate_general_inquiry: bool,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct KnowledgeConfig {
    pub search_limit: usize,
    pub min_relevance: f64,
}

#[derive(Clone, Debug)]
pub struct MiddlewareConfig {
    pub timing: bool,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub cache_enabled: bool,
    pub cache_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
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
    pub max_turns: Option<u32>,
    pub entry_handler: Option<String>,
    pub allow_revisits: Option<bool>,
    pub confidence_threshold: Option<f64>,
    pub escalate_general_inquiry: Option<bool>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub cache_enabled: Option<bool>,
    pub log_level: Option<String>,
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

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            workflow: WorkflowConfig {
                entry_handler: ROUTER.to_string(),
                escalation_handler: ESCALATION.to_string(),
                max_turns: DEFAULT_MAX_TURNS,
                allow_revisits: false,
            },
            escalation: EscalationConfig {
                confidence_threshold: 0.5,
                negative_sentiment_threshold: -0.7,
                escalate_general_inquiry: true,
            },
            llm: LlmConfig {
                api_key: None,
                model: "support-large".to_string(),
                timeout_secs: 30,
                max_tokens: 512,
            },
            knowledge: KnowledgeConfig { search_limit: 3, min_relevance: 0.0 },
            middleware: MiddlewareConfig {
                timing: true,
                retry_max_attempts: 3,
                retry_base_delay_ms: 100,
                cache_enabled: true,
                cache_capacity: 256,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
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

impl SwitchboardConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn escalation_policy(&self) -> EscalationPolicy {
        EscalationPolicy {
            confidence_threshold: self.escalation.confidence_threshold,
            negative_sentiment_threshold: self.escalation.negative_sentiment_threshold,
        }
    }

    pub fn routing_table(&self) -> RoutingTable {
        RoutingTable::new(self.escalation.escalate_general_inquiry)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(workflow) = patch.workflow {
            if let Some(entry_handler) = workflow.entry_handler {
                self.workflow.entry_handler = entry_handler;
            }
            if let Some(escalation_handler) = workflow.escalation_handler {
                self.workflow.escalation_handler = escalation_handler;
            }
            if let Some(max_turns) = workflow.max_turns {
                self.workflow.max_turns = max_turns;
            }
            if let Some(allow_revisits) = workflow.allow_revisits {
                self.workflow.allow_revisits = allow_revisits;
            }
        }

        if let Some(escalation) = patch.escalation {
            if let Some(threshold) = escalation.confidence_threshold {
                self.escalation.confidence_threshold = threshold;
            }
            if let Some(threshold) = escalation.negative_sentiment_threshold {
                self.escalation.negative_sentiment_threshold = threshold;
            }
            if let Some(escalate) = escalation.escalate_general_inquiry {
                self.escalation.escalate_general_inquiry = escalate;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(api_key.into());
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
        }

        if let Some(knowledge) = patch.knowledge {
            if let Some(search_limit) = knowledge.search_limit {
                self.knowledge.search_limit = search_limit;
            }
            if let Some(min_relevance) = knowledge.min_relevance {
                self.knowledge.min_relevance = min_relevance;
            }
        }

        if let Some(middleware) = patch.middleware {
            if let Some(timing) = middleware.timing {
                self.middleware.timing = timing;
            }
            if let Some(attempts) = middleware.retry_max_attempts {
                self.middleware.retry_max_attempts = attempts;
            }
            if let Some(delay) = middleware.retry_base_delay_ms {
                self.middleware.retry_base_delay_ms = delay;
            }
            if let Some(cache_enabled) = middleware.cache_enabled {
                self.middleware.cache_enabled = cache_enabled;
            }
            if let Some(cache_capacity) = middleware.cache_capacity {
                self.middleware.cache_capacity = cache_capacity;
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
        if let Some(value) = read_env("SWITCHBOARD_WORKFLOW_ENTRY_HANDLER") {
            self.workflow.entry_handler = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_WORKFLOW_ESCALATION_HANDLER") {
            self.workflow.escalation_handler = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_WORKFLOW_MAX_TURNS") {
            self.workflow.max_turns = parse_env("SWITCHBOARD_WORKFLOW_MAX_TURNS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_WORKFLOW_ALLOW_REVISITS") {
            self.workflow.allow_revisits =
                parse_env("SWITCHBOARD_WORKFLOW_ALLOW_REVISITS", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_ESCALATION_CONFIDENCE_THRESHOLD") {
            self.escalation.confidence_threshold =
                parse_env("SWITCHBOARD_ESCALATION_CONFIDENCE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_ESCALATION_NEGATIVE_SENTIMENT_THRESHOLD") {
            self.escalation.negative_sentiment_threshold =
                parse_env("SWITCHBOARD_ESCALATION_NEGATIVE_SENTIMENT_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_ESCALATION_GENERAL_INQUIRY") {
            self.escalation.escalate_general_inquiry =
                parse_env("SWITCHBOARD_ESCALATION_GENERAL_INQUIRY", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_LLM_API_KEY") {
            self.llm.api_key = Some(value.into());
        }
        if let Some(value) = read_env("SWITCHBOARD_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("SWITCHBOARD_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_env("SWITCHBOARD_LLM_MAX_TOKENS", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_KNOWLEDGE_SEARCH_LIMIT") {
            self.knowledge.search_limit = parse_env("SWITCHBOARD_KNOWLEDGE_SEARCH_LIMIT", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_KNOWLEDGE_MIN_RELEVANCE") {
            self.knowledge.min_relevance =
                parse_env("SWITCHBOARD_KNOWLEDGE_MIN_RELEVANCE", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_MIDDLEWARE_TIMING") {
            self.middleware.timing = parse_env("SWITCHBOARD_MIDDLEWARE_TIMING", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_MIDDLEWARE_RETRY_MAX_ATTEMPTS") {
            self.middleware.retry_max_attempts =
                parse_env("SWITCHBOARD_MIDDLEWARE_RETRY_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_MIDDLEWARE_RETRY_BASE_DELAY_MS") {
            self.middleware.retry_base_delay_ms =
                parse_env("SWITCHBOARD_MIDDLEWARE_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_MIDDLEWARE_CACHE_ENABLED") {
            self.middleware.cache_enabled =
                parse_env("SWITCHBOARD_MIDDLEWARE_CACHE_ENABLED", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_MIDDLEWARE_CACHE_CAPACITY") {
            self.middleware.cache_capacity =
                parse_env("SWITCHBOARD_MIDDLEWARE_CACHE_CAPACITY", &value)?;
        }

        let log_level =
            read_env("SWITCHBOARD_LOGGING_LEVEL").or_else(|| read_env("SWITCHBOARD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SWITCHBOARD_LOGGING_FORMAT").or_else(|| read_env("SWITCHBOARD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(max_turns) = overrides.max_turns {
            self.workflow.max_turns = max_turns;
        }
        if let Some(entry_handler) = overrides.entry_handler {
            self.workflow.entry_handler = entry_handler;
        }
        if let Some(allow_revisits) = overrides.allow_revisits {
            self.workflow.allow_revisits = allow_revisits;
        }
        if let Some(threshold) = overrides.confidence_threshold {
            self.escalation.confidence_threshold = threshold;
        }
        if let Some(escalate) = overrides.escalate_general_inquiry {
            self.escalation.escalate_general_inquiry = escalate;
        }
        if let Some(api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(api_key.into());
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(cache_enabled) = overrides.cache_enabled {
            self.middleware.cache_enabled = cache_enabled;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_workflow(&self.workflow)?;
        validate_escalation(&self.escalation)?;
        validate_llm(&self.llm)?;
        validate_knowledge(&self.knowledge)?;
        validate_middleware(&self.middleware)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
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

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.max_turns == 0 {
        return Err(ConfigError::Validation(
            "workflow.max_turns must be greater than zero".to_string(),
        ));
    }
    if workflow.entry_handler.trim().is_empty() {
        return Err(ConfigError::Validation("workflow.entry_handler must not be empty".to_string()));
    }
    if workflow.escalation_handler.trim().is_empty() {
        return Err(ConfigError::Validation(
            "workflow.escalation_handler must not be empty".to_string(),
        ));
    }
    if workflow.entry_handler == workflow.escalation_handler {
        return Err(ConfigError::Validation(
            "workflow.entry_handler and workflow.escalation_handler must differ".to_string(),
        ));
    }
    Ok(())
}

fn validate_escalation(escalation: &EscalationConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&escalation.confidence_threshold) {
        return Err(ConfigError::Validation(
            "escalation.confidence_threshold must be in range 0.0..=1.0".to_string(),
        ));
    }
    if !(-1.0..=1.0).contains(&escalation.negative_sentiment_threshold) {
        return Err(ConfigError::Validation(
            "escalation.negative_sentiment_threshold must be in range -1.0..=1.0".to_string(),
        ));
    }
    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation("llm.max_tokens must be greater than zero".to_string()));
    }
    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }
    let blank_key = llm.api_key.as_ref().map(|key| key.expose_secret().trim().is_empty());
    if blank_key == Some(true) {
        return Err(ConfigError::Validation(
            "llm.api_key must not be blank when provided".to_string(),
        ));
    }
    Ok(())
}

fn validate_knowledge(knowledge: &KnowledgeConfig) -> Result<(), ConfigError> {
    if knowledge.search_limit == 0 {
        return Err(ConfigError::Validation(
            "knowledge.search_limit must be greater than zero".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&knowledge.min_relevance) {
        return Err(ConfigError::Validation(
            "knowledge.min_relevance must be in range 0.0..=1.0".to_string(),
        ));
    }
    Ok(())
}

fn validate_middleware(middleware: &MiddlewareConfig) -> Result<(), ConfigError> {
    if middleware.retry_max_attempts == 0 {
        return Err(ConfigError::Validation(
            "middleware.retry_max_attempts must be at least 1".to_string(),
        ));
    }
    if middleware.retry_base_delay_ms > 60_000 {
        return Err(ConfigError::Validation(
            "middleware.retry_base_delay_ms must be at most 60000".to_string(),
        ));
    }
    if middleware.cache_enabled && middleware.cache_capacity == 0 {
        return Err(ConfigError::Validation(
            "middleware.cache_capacity must be greater than zero when caching is enabled"
                .to_string(),
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
    workflow: Option<WorkflowPatch>,
    escalation: Option<EscalationPatch>,
    llm: Option<LlmPatch>,
    knowledge: Option<KnowledgePatch>,
    middleware: Option<MiddlewarePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    entry_handler: Option<String>,
    escalation_handler: Option<String>,
    max_turns: Option<u32>,
    allow_revisits: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct EscalationPatch {
    confidence_threshold: Option<f64>,
    negative_sentiment_threshold: Option<f64>,
    escalate_general_inquiry: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgePatch {
    search_limit: Option<usize>,
    min_relevance: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct MiddlewarePatch {
    timing: Option<bool>,
    retry_max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    cache_enabled: Option<bool>,
    cache_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
