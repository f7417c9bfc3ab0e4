use crate::error::{MarketError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;
use usertest_ledger::{Cents, TrustThresholds};

/// Marketplace rules. Loaded from the node's `[ledger]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketParams {
    /// Fee applied to tasks that do not carry their own.
    pub platform_fee_percent: u8,

    /// Smallest withdrawal, in cents.
    pub min_payout: Cents,

    /// Smallest wallet top-up through checkout, in cents.
    pub min_checkout: Cents,

    /// Free-form instructions shorter than this need at least one step.
    pub min_instructions_len: usize,

    pub default_max_testers: u32,

    pub default_video_duration_secs: u32,

    /// Rating stored when the developer approves without one.
    pub default_rating: u8,

    pub trust: TrustThresholds,

    pub currency: String,

    /// Country used when opening connected payout accounts.
    pub connect_country: String,

    pub webhook_tolerance_secs: i64,

    /// Lets testers delete their own submissions. Development only.
    pub allow_debug_cancel: bool,
}

impl Default for MarketParams {
    fn default() -> Self {
        Self {
            platform_fee_percent: 20,
            min_payout: Cents::new(100),
            min_checkout: Cents::new(500),
            min_instructions_len: 50,
            default_max_testers: 1,
            default_video_duration_secs: 180,
            default_rating: 5,
            trust: TrustThresholds::default(),
            currency: "usd".to_string(),
            connect_country: "US".to_string(),
            webhook_tolerance_secs: 300,
            allow_debug_cancel: false,
        }
    }
}

impl MarketParams {
    pub fn validate(&self) -> Result<()> {
        if self.platform_fee_percent > 100 {
            return Err(MarketError::InvalidRequest(format!(
                "platform_fee_percent must be at most 100, got {}",
                self.platform_fee_percent
            )));
        }
        if !self.min_payout.is_positive() || !self.min_checkout.is_positive() {
            return Err(MarketError::InvalidRequest(
                "payout and checkout minimums must be positive".to_string(),
            ));
        }
        if self.trust.regular_at > self.trust.trusted_at {
            return Err(MarketError::InvalidRequest(
                "regular trust threshold must not exceed trusted threshold".to_string(),
            ));
        }
        if !(1..=5).contains(&self.default_rating) {
            return Err(MarketError::InvalidRequest(
                "default_rating must be within 1..=5".to_string(),
            ));
        }
        if self.allow_debug_cancel {
            warn!("⚠️ Debug submission cancellation is enabled");
        }
        Ok(())
    }
}
