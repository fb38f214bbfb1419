//! Workflow runtime for the switchboard support assistant.
//!
//! A conversation enters at the router, which classifies the message and
//! either answers, hands off to one specialist (billing, technical, usage,
//! integration), or escalates to a person. [`runtime::WorkflowRuntime`]
//! sequences those handlers and guarantees every run ends in a validated
//! terminal state:
//!
//! 1. **Classification** (`classifier`) - message to intent, confidence, sentiment
//! 2. **Handlers** (`handlers`) - router, specialists, escalation
//! 3. **Middleware** (`middleware`) - timing, retry with backoff, answer caching
//! 4. **Collaborators** (`llm`, `knowledge`, `store`) - external services behind traits
//!
//! The completion service only writes prose. Routing, escalation and state
//! validation are deterministic decisions made in `switchboard-core`.

pub mod classifier;
pub mod handlers;
pub mod knowledge;
pub mod llm;
pub mod middleware;
pub mod runtime;
pub mod store;

pub use classifier::{Classification, ClassificationError, IntentClassifier};
pub use handlers::{Collaborators, Handler, HandlerError, HandlerRegistry};
pub use runtime::{EngineError, WorkflowRuntime};
