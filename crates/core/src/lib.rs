pub mod config;
pub mod domain;
pub mod errors;
pub mod history;
pub mod lifecycle;
pub mod result;
pub mod routing;

pub use config::{ConfigError, ConfigOverrides, LoadOptions, LogFormat, SwitchboardConfig};
pub use domain::conversation::{
    ConversationId, ConversationState, ConversationStatus, Message, Role, DEFAULT_MAX_TURNS,
};
pub use domain::intent::{Intent, IntentFamily};
pub use domain::knowledge::KnowledgeArticle;
pub use errors::{InvalidStateError, RoutingError};
pub use history::{StateHistory, StateSnapshot};
pub use lifecycle::{ConversationContext, StateManager, StateUpdates};
pub use result::{ResultHandler, ResultMetadata, WorkflowResult, REDACTION_MARKER};
pub use routing::{
    EscalationDecision, EscalationPolicy, EscalationTrigger, RouteTarget, RoutingTable,
    TURN_BUDGET_EXCEEDED,
};
