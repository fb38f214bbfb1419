use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use switchboard_agent::classifier::{KeywordIntentClassifier, LlmIntentClassifier};
use switchboard_agent::handlers::escalation::EscalationHandler;
use switchboard_agent::handlers::{Collaborators, Handler, HandlerError, HandlerRegistry, FALLBACK_RESPONSE};
use switchboard_agent::knowledge::InMemoryKnowledgeBase;
use switchboard_agent::llm::ScriptedLlmClient;
use switchboard_agent::runtime::{EngineError, WorkflowRuntime, UNRESOLVED_TERMINATION};
use switchboard_agent::store::{ConversationStore, InMemoryConversationStore};
use switchboard_core::config::SwitchboardConfig;
use switchboard_core::domain::conversation::{ConversationId, ConversationState, Message};
use switchboard_core::history::StateHistory;
use switchboard_core::lifecycle::ConversationContext;
use switchboard_core::result::REDACTION_MARKER;
use switchboard_core::routing::escalation::TURN_BUDGET_EXCEEDED;
use tokio_util::sync::CancellationToken;

fn test_config() -> SwitchboardConfig {
    let mut config = SwitchboardConfig::default();
    config.middleware.retry_base_delay_ms = 1;
    config
}

/// Runtime whose classifier reads its verdict from `llm` first.
fn llm_classified_runtime(llm: ScriptedLlmClient) -> WorkflowRuntime {
    let llm = Arc::new(llm);
    let collaborators = Collaborators {
        llm: llm.clone(),
        knowledge: Arc::new(InMemoryKnowledgeBase::seeded()),
        classifier: Arc::new(LlmIntentClassifier::new(llm, 128)),
    };
    WorkflowRuntime::from_config(&test_config(), collaborators)
}

fn keyword_runtime(llm: ScriptedLlmClient) -> WorkflowRuntime {
    let collaborators = Collaborators {
        llm: Arc::new(llm),
        knowledge: Arc::new(InMemoryKnowledgeBase::seeded()),
        classifier: Arc::new(KeywordIntentClassifier::new()),
    };
    WorkflowRuntime::from_config(&test_config(), collaborators)
}

/// Test handler driven by a plain function over the state.
struct StepHandler {
    name: &'static str,
    step: fn(&mut ConversationState),
}

#[async_trait]
impl Handler for StepHandler {
    fn name(&self) -> &str {
        self.name
    }

    async fn process(&self, mut state: ConversationState) -> Result<ConversationState, HandlerError> {
        state.begin_turn(self.name);
        (self.step)(&mut state);
        Ok(state)
    }
}

fn step(name: &'static str, step: fn(&mut ConversationState)) -> StepHandler {
    StepHandler { name, step }
}

fn registry_with(handlers: Vec<StepHandler>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for handler in handlers {
        registry.register(handler);
    }
    registry.register(EscalationHandler::new());
    registry
}

#[tokio::test]
async fn confident_upgrade_request_is_resolved_by_billing() {
    let llm = ScriptedLlmClient::always("Open Settings > Billing and choose Premium.").with_response(
        Ok(r#"{"intent": "billing_upgrade", "confidence": 0.92, "sentiment": 0.1}"#.to_string()),
    );
    let runtime = llm_classified_runtime(llm);

    let result = runtime.run_workflow("I want to upgrade to premium", None).await.expect("run");

    assert_eq!(result.status, "resolved");
    assert_eq!(result.handler_history, vec!["router", "billing"]);
    assert_eq!(result.primary_intent.as_deref(), Some("billing_upgrade"));
    assert_eq!(result.intent_confidence, 0.92);
    assert_eq!(result.response_text, "Open Settings > Billing and choose Premium.");
    assert!(result.knowledge_articles.contains(&"Upgrading your plan".to_string()));
    assert!(!result.should_escalate);
    assert!(!result.cancelled);
}

#[tokio::test]
async fn low_confidence_classification_escalates() {
    let llm = ScriptedLlmClient::always("unused").with_response(Ok(
        r#"{"intent": "billing_refund", "confidence": 0.3, "sentiment": 0.0}"#.to_string(),
    ));
    let runtime = llm_classified_runtime(llm);

    let result = runtime.run_workflow("refund maybe?", None).await.expect("run");

    assert_eq!(result.status, "escalated");
    assert!(result.should_escalate);
    assert!(!result.escalation_reason.is_empty());
    assert_eq!(result.handler_history, vec!["router", "escalation"]);
    assert!(!result.response_text.is_empty());
}

#[tokio::test]
async fn very_negative_sentiment_escalates_despite_confidence() {
    let llm = ScriptedLlmClient::always("unused").with_response(Ok(
        r#"{"intent": "technical_bug", "confidence": 0.95, "sentiment": -0.9}"#.to_string(),
    ));
    let runtime = llm_classified_runtime(llm);

    let result = runtime.run_workflow("your app is broken again", None).await.expect("run");

    assert_eq!(result.status, "escalated");
    assert!(result.escalation_reason.contains("sentiment"));
    assert!(!result.handler_history.contains(&"technical".to_string()));
}

#[tokio::test]
async fn unknown_next_handler_is_escalated_not_fatal() {
    let registry = registry_with(vec![step("router", |state| state.route_to("nonexistent"))]);
    let runtime = WorkflowRuntime::new(registry);

    let result = runtime.run_workflow("hello", None).await.expect("run");

    assert_eq!(result.status, "escalated");
    assert!(result.escalation_reason.contains("nonexistent"));
    assert_eq!(result.handler_history, vec!["router", "escalation"]);
}

#[tokio::test]
async fn turn_budget_stops_endless_routing() {
    let registry = registry_with(vec![
        step("router", |state| state.route_to("ping")),
        step("ping", |state| state.route_to("pong")),
        step("pong", |state| state.route_to("ping")),
    ]);
    let runtime = WorkflowRuntime::new(registry).with_max_turns(3).with_allow_revisits(true);

    let result = runtime.run_workflow("loop forever", None).await.expect("run");

    assert_eq!(result.status, "escalated");
    assert_eq!(result.escalation_reason, TURN_BUDGET_EXCEEDED);
    assert_eq!(result.turn_count, 3);
    assert_eq!(result.handler_history, vec!["router", "ping", "pong", "escalation"]);
}

#[tokio::test]
async fn revisiting_a_handler_is_a_cycle() {
    let registry = registry_with(vec![
        step("router", |state| state.route_to("ping")),
        step("ping", |state| state.route_to("router")),
    ]);
    let runtime = WorkflowRuntime::new(registry);

    let result = runtime.run_workflow("go around", None).await.expect("run");

    assert_eq!(result.status, "escalated");
    assert!(result.escalation_reason.contains("already visited"));
    assert_eq!(result.handler_history, vec!["router", "ping", "escalation"]);
}

#[tokio::test]
async fn handler_ending_without_status_defaults_to_escalated() {
    let registry = registry_with(vec![step("router", |_| {})]);
    let runtime = WorkflowRuntime::new(registry);

    let result = runtime.run_workflow("anything", None).await.expect("run");

    assert_eq!(result.status, "escalated");
    assert_eq!(result.escalation_reason, UNRESOLVED_TERMINATION);
    assert_eq!(result.response_text, FALLBACK_RESPONSE);
}

#[tokio::test]
async fn terminal_status_wins_over_stray_route() {
    let registry = registry_with(vec![step("router", |state| {
        state.respond("done", 1.0, "router");
        state.resolve();
        state.route_to("billing");
    })]);
    let runtime = WorkflowRuntime::new(registry);

    let result = runtime.run_workflow("hi", None).await.expect("run");

    assert_eq!(result.status, "resolved");
    assert_eq!(result.handler_history, vec!["router"]);
}

#[tokio::test]
async fn exhausted_retries_become_an_escalated_result() {
    let llm = ScriptedLlmClient::new();
    let runtime = keyword_runtime(llm.clone());

    let result = runtime.run_workflow("I want to upgrade to premium", None).await.expect("run");

    assert_eq!(result.status, "escalated");
    assert_eq!(result.response_text, FALLBACK_RESPONSE);
    assert_eq!(result.handler_history, vec!["router", "billing"]);
    assert!(result.escalation_reason.contains("no scripted response"));
    assert_eq!(llm.call_count(), 3);
}

/// Test handler that leaves turn bookkeeping entirely to `step`.
struct UncountedHandler {
    name: &'static str,
    step: fn(&mut ConversationState),
}

#[async_trait]
impl Handler for UncountedHandler {
    fn name(&self) -> &str {
        self.name
    }

    async fn process(&self, mut state: ConversationState) -> Result<ConversationState, HandlerError> {
        (self.step)(&mut state);
        Ok(state)
    }
}

async fn run_uncounted(step: fn(&mut ConversationState)) -> EngineError {
    let mut registry = registry_with(Vec::new());
    registry.register(UncountedHandler { name: "router", step });
    let runtime = WorkflowRuntime::new(registry).with_max_turns(3).with_allow_revisits(true);

    tokio::time::timeout(Duration::from_secs(2), runtime.run_workflow("hello", None))
        .await
        .expect("workflow must terminate")
        .expect_err("must fail")
}

#[tokio::test]
async fn self_routing_without_taking_a_turn_is_a_contract_violation() {
    let error = run_uncounted(|state| state.route_to("router")).await;

    match error {
        EngineError::ContractViolation { handler, source } => {
            assert_eq!(handler, "router");
            assert_eq!(source.field, "handler_history");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn counting_a_turn_without_recording_the_handler_is_a_contract_violation() {
    let error = run_uncounted(|state| {
        state.turn_count += 1;
        state.route_to("router");
    })
    .await;

    match error {
        EngineError::ContractViolation { handler, source } => {
            assert_eq!(handler, "router");
            assert_eq!(source.field, "handler_history");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn recording_the_handler_without_counting_the_turn_is_a_contract_violation() {
    let error = run_uncounted(|state| {
        state.handler_history.push("router".to_string());
        state.route_to("router");
    })
    .await;

    match error {
        EngineError::ContractViolation { source, .. } => assert_eq!(source.field, "turn_count"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn mutating_conversation_id_is_a_contract_violation() {
    let registry = registry_with(vec![step("router", |state| {
        state.conversation_id = ConversationId("hijacked".to_string());
        state.route_to("escalation");
    })]);
    let runtime = WorkflowRuntime::new(registry);

    let error = runtime.run_workflow("hello", None).await.expect_err("must fail");

    match error {
        EngineError::ContractViolation { handler, source } => {
            assert_eq!(handler, "router");
            assert_eq!(source.field, "conversation_id");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn blank_message_is_invalid_input() {
    let runtime = keyword_runtime(ScriptedLlmClient::always("unused"));
    let error = runtime.run_workflow("   ", None).await.expect_err("must fail");
    assert!(matches!(error, EngineError::InvalidInput(_)));
}

struct CancellingRouter {
    token: CancellationToken,
}

#[async_trait]
impl Handler for CancellingRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn process(&self, mut state: ConversationState) -> Result<ConversationState, HandlerError> {
        state.begin_turn("router");
        state.route_to("billing");
        self.token.cancel();
        Ok(state)
    }
}

#[tokio::test]
async fn cancellation_returns_last_validated_state() {
    let token = CancellationToken::new();
    let mut registry = registry_with(vec![step("billing", |state| {
        state.respond("should not run", 1.0, "billing");
        state.resolve();
    })]);
    registry.register(CancellingRouter { token: token.clone() });
    let runtime = WorkflowRuntime::new(registry);

    let result = runtime
        .run_workflow_with_cancellation("upgrade please", None, token)
        .await
        .expect("run");

    assert!(result.cancelled);
    assert_eq!(result.status, "active");
    assert_eq!(result.handler_history, vec!["router"]);
    assert!(!result.response_text.is_empty());
}

#[tokio::test]
async fn finished_runs_are_persisted_and_store_failures_ignored() {
    let store = Arc::new(InMemoryConversationStore::new());
    let runtime = keyword_runtime(ScriptedLlmClient::always("Here is how to export."))
        .with_store(store.clone());

    let context = ConversationContext {
        conversation_id: Some(ConversationId("conv-persist".to_string())),
        ..ConversationContext::default()
    };
    let result = runtime.run_workflow("how do I export a report", Some(context)).await.expect("run");
    assert_eq!(result.conversation_id, "conv-persist");

    let snapshot = store
        .load(&ConversationId("conv-persist".to_string()))
        .await
        .expect("load")
        .expect("snapshot stored");
    assert_eq!(snapshot["status"], result.status.as_str());
    assert_eq!(snapshot, result.sanitized_state);

    store.fail_writes(true);
    let again = runtime.run_workflow("how do I export a report", None).await.expect("run");
    assert_eq!(again.status, result.status);
}

#[tokio::test]
async fn repeated_question_is_served_from_cache() {
    let llm = ScriptedLlmClient::always("Go to Settings > Billing.");
    let runtime = keyword_runtime(llm.clone());

    let first = runtime.run_workflow("I want to upgrade to premium", None).await.expect("run");
    let second = runtime.run_workflow("I want to upgrade to premium", None).await.expect("run");

    assert_eq!(llm.call_count(), 1);
    assert_eq!(second.response_text, first.response_text);
    assert_eq!(second.handler_history, vec!["router", "billing"]);
    assert!(second.tools_used.contains(&"answer_cache".to_string()));
}

#[tokio::test]
async fn history_tracks_every_accepted_state() {
    let history = StateHistory::new();
    let runtime = keyword_runtime(ScriptedLlmClient::always("Sure."))
        .with_history(history.clone());

    runtime.run_workflow("I want to upgrade to premium", None).await.expect("run");

    assert_eq!(history.events(), vec!["created", "router", "billing"]);
    let turns = history.snapshots().iter().map(|snapshot| snapshot.turn).collect::<Vec<_>>();
    assert_eq!(turns, vec![0, 1, 2]);
}

#[tokio::test]
async fn resumption_context_keeps_prior_transcript() {
    let runtime = keyword_runtime(ScriptedLlmClient::always("Here are the steps."));
    let context = ConversationContext {
        conversation_id: Some(ConversationId("conv-resume".to_string())),
        customer_id: Some("cust-42".to_string()),
        prior_messages: vec![Message::user("hello"), Message::assistant("Hi! How can I help?", "router")],
        ..ConversationContext::default()
    };

    let result = runtime
        .run_workflow("how do I set up a webhook integration", Some(context))
        .await
        .expect("run");

    assert_eq!(result.customer_id, "cust-42");
    assert_eq!(result.sanitized_state["messages"]["total"], 4);
    assert_eq!(result.status, "resolved");
}

#[tokio::test]
async fn sensitive_entities_are_redacted_in_results() {
    let runtime = keyword_runtime(ScriptedLlmClient::always("We'll check that invoice."));

    let result = runtime
        .run_workflow("Please resend my invoice to jo@example.com", None)
        .await
        .expect("run");

    assert_eq!(result.entities.get("email"), Some(&Value::from(REDACTION_MARKER)));
}
