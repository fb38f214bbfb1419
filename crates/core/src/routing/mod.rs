pub mod escalation;
pub mod table;

pub use escalation::{EscalationDecision, EscalationPolicy, EscalationTrigger, TURN_BUDGET_EXCEEDED};
pub use table::{RouteTarget, RoutingTable};
