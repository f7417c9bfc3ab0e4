use crate::error::{MarketError, Result};
use crate::params::MarketParams;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};
use usertest_ledger::{Cents, LedgerError, LedgerStore, PayoutId, TrustLevel, UserId, WalletManager};
use usertest_payments::{
    AccountLinkRequest, ConnectedAccountRequest, PaymentGateway, TransferRequest,
};

/// Withdrawal saga: debit the wallet, move money out, then finalize or
/// compensate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutState {
    Requested,
    Debited,
    Transferred,
    FailedCompensated,
}

impl PayoutState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutState::Requested => "requested",
            PayoutState::Debited => "debited",
            PayoutState::Transferred => "transferred",
            PayoutState::FailedCompensated => "failed_compensated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutState::Transferred | PayoutState::FailedCompensated)
    }

    pub fn can_transition_to(&self, next: &PayoutState) -> bool {
        use PayoutState::*;
        matches!(
            (self, next),
            (Requested, Debited) | (Debited, Transferred) | (Debited, FailedCompensated)
        )
    }
}

impl fmt::Display for PayoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Payout {
    pub id: PayoutId,
    pub user_id: UserId,
    #[serde(rename = "amount_cents")]
    pub amount: Cents,
    pub destination: String,
    pub state: PayoutState,
    pub transfer_id: Option<String>,
    pub failure: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl Payout {
    fn new(user_id: UserId, amount: Cents, destination: String, now: DateTime<Utc>) -> Self {
        Self {
            id: PayoutId::new(),
            user_id,
            amount,
            destination,
            state: PayoutState::Requested,
            transfer_id: None,
            failure: None,
            requested_at: now,
        }
    }

    /// Moves the saga forward. Backward and skipping moves are refused.
    pub fn advance(&mut self, next: PayoutState) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(MarketError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutAccountStatus {
    pub has_payout_method: bool,
    pub trust_level: TrustLevel,
    pub completed_tasks_count: u32,
}

/// Runs withdrawals and manages the tester's connected payout account.
pub struct PayoutProcessor {
    store: Arc<dyn LedgerStore>,
    wallets: Arc<WalletManager>,
    gateway: Arc<dyn PaymentGateway>,
    params: Arc<MarketParams>,
}

impl PayoutProcessor {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        wallets: Arc<WalletManager>,
        gateway: Arc<dyn PaymentGateway>,
        params: Arc<MarketParams>,
    ) -> Self {
        Self {
            store,
            wallets,
            gateway,
            params,
        }
    }

    /// Withdraws `amount` to the tester's connected account.
    ///
    /// The wallet is debited before the transfer is attempted. If the
    /// processor refuses the transfer a `payout_reversal` credit restores the
    /// balance and the call fails with [`MarketError::ExternalProcessorError`].
    pub async fn request_payout(&self, user: &UserId, amount: Cents) -> Result<Payout> {
        if amount < self.params.min_payout {
            return Err(MarketError::BelowMinimum {
                minimum: self.params.min_payout,
                requested: amount,
            });
        }

        let profile = self.store.get_or_create_profile(user).await?;
        let destination = profile
            .stripe_account_id
            .ok_or(MarketError::PayoutMethodMissing)?;

        let mut payout = Payout::new(user.clone(), amount, destination, self.wallets.now());
        info!(
            payout_id = %payout.id,
            user = %user,
            amount_cents = amount.as_i64(),
            "📝 Payout requested"
        );

        match self.wallets.debit_for_payout(user, amount, payout.id).await {
            Ok(_) => payout.advance(PayoutState::Debited)?,
            Err(e @ LedgerError::InsufficientBalance { .. }) => {
                warn!(payout_id = %payout.id, user = %user, error = %e, "Payout refused");
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        }

        let transfer = self
            .gateway
            .create_transfer(TransferRequest {
                payout_id: payout.id,
                user_id: user.clone(),
                amount,
                currency: self.params.currency.clone(),
                destination: payout.destination.clone(),
            })
            .await;

        match transfer {
            Ok(transfer) => {
                payout.transfer_id = Some(transfer.id);
                payout.advance(PayoutState::Transferred)?;
                info!(
                    payout_id = %payout.id,
                    user = %user,
                    amount_cents = amount.as_i64(),
                    transfer_id = ?payout.transfer_id,
                    "✅ Payout transferred"
                );
                Ok(payout)
            }
            Err(transfer_error) => {
                let reason = transfer_error.to_string();
                if let Err(e) = self
                    .wallets
                    .reverse_payout(user, amount, payout.id, reason.clone())
                    .await
                {
                    error!(
                        payout_id = %payout.id,
                        user = %user,
                        amount_cents = amount.as_i64(),
                        error = %e,
                        "Payout compensation failed, wallet left debited"
                    );
                    return Err(e.into());
                }
                payout.failure = Some(reason.clone());
                payout.advance(PayoutState::FailedCompensated)?;
                warn!(
                    payout_id = %payout.id,
                    user = %user,
                    amount_cents = amount.as_i64(),
                    error = %reason,
                    "↩️ Payout compensated"
                );
                Err(MarketError::ExternalProcessorError(reason))
            }
        }
    }

    /// Creates a connected account unless the profile already has one.
    /// Returns the account id and whether it was created now.
    pub async fn ensure_payout_account(
        &self,
        user: &UserId,
        email: Option<String>,
    ) -> Result<(String, bool)> {
        let profile = self.store.get_or_create_profile(user).await?;
        if let Some(existing) = profile.stripe_account_id {
            return Ok((existing, false));
        }

        let account = self
            .gateway
            .create_connected_account(ConnectedAccountRequest {
                user_id: user.clone(),
                email: email.or(profile.email),
                country: self.params.connect_country.clone(),
            })
            .await?;
        self.store.set_stripe_account_id(user, &account.id).await?;
        info!(user = %user, account_id = %account.id, "🏦 Payout account attached");
        Ok((account.id, true))
    }

    /// Hosted onboarding link for the tester's connected account.
    pub async fn onboarding_link(
        &self,
        user: &UserId,
        base_url: &str,
        return_path: &str,
    ) -> Result<String> {
        let profile = self.store.get_or_create_profile(user).await?;
        let account_id = profile.stripe_account_id.ok_or_else(|| {
            MarketError::InvalidRequest(
                "No payout account. Create one first via create-account.".to_string(),
            )
        })?;

        let path = if return_path.starts_with('/') {
            return_path.to_string()
        } else {
            format!("/{}", return_path)
        };
        let separator = if path.contains('?') { '&' } else { '?' };
        let base = base_url.trim_end_matches('/');

        let link = self
            .gateway
            .create_account_link(AccountLinkRequest {
                account_id,
                refresh_url: format!("{}{}{}refresh=1", base, path, separator),
                return_url: format!("{}{}", base, path),
            })
            .await?;
        Ok(link.url)
    }

    pub async fn account_status(&self, user: &UserId) -> Result<PayoutAccountStatus> {
        let profile = self.store.get_or_create_profile(user).await?;
        Ok(PayoutAccountStatus {
            has_payout_method: profile.stripe_account_id.is_some(),
            trust_level: profile.trust_level,
            completed_tasks_count: profile.completed_tasks_count,
        })
    }
}
