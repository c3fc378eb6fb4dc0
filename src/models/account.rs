use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Access,
    Member,
    Pro,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Access => "access",
            Tier::Member => "member",
            Tier::Pro => "pro",
        }
    }

    /// Tolerant parse for tier strings coming off the wire. Unknown or empty
    /// values fall back to the free tier.
    pub fn from_raw(raw: Option<&str>) -> Self {
        let normalized = raw.unwrap_or_default().trim().to_lowercase();
        match normalized.as_str() {
            "member" => Tier::Member,
            "pro" => Tier::Pro,
            _ => Tier::Access,
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, Tier::Access)
    }

    /// Rewards-points display multiplier. Accrual itself happens server-side;
    /// this only drives the "2x points" style badge.
    pub fn points_boost(&self) -> u32 {
        match self {
            Tier::Access => 1,
            Tier::Member => 2,
            Tier::Pro => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Free,
}

impl SubscriptionStatus {
    pub fn from_raw(raw: Option<&str>) -> Self {
        let normalized = raw.unwrap_or_default().trim().to_lowercase();
        match normalized.as_str() {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" | "cancelled" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::Free,
        }
    }

    /// Whether the billing system still grants paid access in this state.
    /// `past_due` keeps access during the grace period.
    pub fn entitles_access(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing | SubscriptionStatus::PastDue
        )
    }
}

/// Membership record as reported by the backend account endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<OffsetDateTime>,
}

impl Account {
    pub fn is_paid(&self) -> bool {
        self.tier.is_paid() && self.status.entitles_access()
    }
}
