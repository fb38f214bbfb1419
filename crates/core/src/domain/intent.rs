use serde::{Deserialize, Serialize};

/// Fixed set of customer intents a classifier may report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    BillingUpgrade,
    BillingDowngrade,
    BillingRefund,
    BillingInvoice,
    TechnicalBug,
    TechnicalError,
    TechnicalPerformance,
    UsageHowTo,
    UsageFeatureQuestion,
    IntegrationSetup,
    IntegrationApi,
    AccountManagement,
    Greeting,
    GeneralInquiry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentFamily {
    Billing,
    Technical,
    Usage,
    Integration,
    Account,
    Greeting,
    General,
}

impl Intent {
    pub const ALL: [Intent; 14] = [
        Intent::BillingUpgrade,
        Intent::BillingDowngrade,
        Intent::BillingRefund,
        Intent::BillingInvoice,
        Intent::TechnicalBug,
        Intent::TechnicalError,
        Intent::TechnicalPerformance,
        Intent::UsageHowTo,
        Intent::UsageFeatureQuestion,
        Intent::IntegrationSetup,
        Intent::IntegrationApi,
        Intent::AccountManagement,
        Intent::Greeting,
        Intent::GeneralInquiry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BillingUpgrade => "billing_upgrade",
            Self::BillingDowngrade => "billing_downgrade",
            Self::BillingRefund => "billing_refund",
            Self::BillingInvoice => "billing_invoice",
            Self::TechnicalBug => "technical_bug",
            Self::TechnicalError => "technical_error",
            Self::TechnicalPerformance => "technical_performance",
            Self::UsageHowTo => "usage_how_to",
            Self::UsageFeatureQuestion => "usage_feature_question",
            Self::IntegrationSetup => "integration_setup",
            Self::IntegrationApi => "integration_api",
            Self::AccountManagement => "account_management",
            Self::Greeting => "greeting",
            Self::GeneralInquiry => "general_inquiry",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|intent| intent.as_str() == normalized)
    }

    pub fn family(&self) -> IntentFamily {
        match self {
            Self::BillingUpgrade | Self::BillingDowngrade | Self::BillingRefund | Self::BillingInvoice => {
                IntentFamily::Billing
            }
            Self::TechnicalBug | Self::TechnicalError | Self::TechnicalPerformance => {
                IntentFamily::Technical
            }
            Self::UsageHowTo | Self::UsageFeatureQuestion => IntentFamily::Usage,
            Self::IntegrationSetup | Self::IntegrationApi => IntentFamily::Integration,
            Self::AccountManagement => IntentFamily::Account,
            Self::Greeting => IntentFamily::Greeting,
            Self::GeneralInquiry => IntentFamily::General,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
