use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::intent::{Intent, IntentFamily};

pub const ROUTER: &str = "router";
pub const BILLING: &str = "billing";
pub const TECHNICAL: &str = "technical";
pub const USAGE: &str = "usage";
pub const INTEGRATION: &str = "integration";
pub const ESCALATION: &str = "escalation";

pub const BUILTIN_HANDLERS: [&str; 6] = [ROUTER, BILLING, TECHNICAL, USAGE, INTEGRATION, ESCALATION];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "handler", rename_all = "snake_case")]
pub enum RouteTarget {
    /// Hand the conversation to a specialist handler.
    Handler(String),
    /// The router answers on its own and terminates.
    Direct,
    /// Hand the conversation to a human via the escalation handler.
    Escalate,
}

/// Decision table from classified intent to the next step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingTable {
    routes: BTreeMap<Intent, RouteTarget>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RoutingTable {
    pub fn new(escalate_general_inquiry: bool) -> Self {
        let routes = Intent::ALL
            .into_iter()
            .map(|intent| {
                let target = match intent.family() {
                    IntentFamily::Billing | IntentFamily::Account => {
                        RouteTarget::Handler(BILLING.to_string())
                    }
                    IntentFamily::Technical => RouteTarget::Handler(TECHNICAL.to_string()),
                    IntentFamily::Usage => RouteTarget::Handler(USAGE.to_string()),
                    IntentFamily::Integration => RouteTarget::Handler(INTEGRATION.to_string()),
                    IntentFamily::Greeting => RouteTarget::Direct,
                    IntentFamily::General if escalate_general_inquiry => RouteTarget::Escalate,
                    IntentFamily::General => RouteTarget::Direct,
                };
                (intent, target)
            })
            .collect();

        Self { routes }
    }

    pub fn with_route(mut self, intent: Intent, target: RouteTarget) -> Self {
        self.routes.insert(intent, target);
        self
    }

    pub fn route(&self, intent: Intent) -> RouteTarget {
        self.routes.get(&intent).cloned().unwrap_or(RouteTarget::Escalate)
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::intent::Intent;
    use crate::routing::table::{RouteTarget, RoutingTable, BILLING, TECHNICAL};

    #[test]
    fn specialist_families_route_to_their_handler() {
        let table = RoutingTable::default();
        assert_eq!(table.route(Intent::BillingUpgrade), RouteTarget::Handler(BILLING.to_owned()));
        assert_eq!(table.route(Intent::AccountManagement), RouteTarget::Handler(BILLING.to_owned()));
        assert_eq!(table.route(Intent::TechnicalBug), RouteTarget::Handler(TECHNICAL.to_owned()));
        assert_eq!(table.route(Intent::Greeting), RouteTarget::Direct);
    }

    #[test]
    fn general_inquiry_policy_is_configurable() {
        assert_eq!(RoutingTable::new(true).route(Intent::GeneralInquiry), RouteTarget::Escalate);
        assert_eq!(RoutingTable::new(false).route(Intent::GeneralInquiry), RouteTarget::Direct);
    }

    #[test]
    fn routes_can_be_overridden() {
        let table = RoutingTable::default().with_route(Intent::BillingRefund, RouteTarget::Escalate);
        assert_eq!(table.route(Intent::BillingRefund), RouteTarget::Escalate);
    }
}
