use crate::models::account::{Account, Tier};

/// Locally-known "this user is now paid" fact.
///
/// Set at most once per page view and never reverted, so a just-upgraded
/// account does not flash back to the free tier while the membership store
/// catches up with the payment webhook.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TierOverride(Option<Tier>);

impl TierOverride {
    /// Records a paid tier. Free tiers and later updates are ignored.
    pub fn note_paid(&mut self, tier: Tier) {
        if self.0.is_none() && tier.is_paid() {
            self.0 = Some(tier);
        }
    }

    pub fn get(&self) -> Option<Tier> {
        self.0
    }

    /// Effective tier for display: the override wins over a possibly stale
    /// membership read.
    pub fn resolve(&self, account: &Account) -> Tier {
        self.0.unwrap_or(account.tier)
    }
}
