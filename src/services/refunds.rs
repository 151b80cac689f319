//! Refund orchestration.
//!
//! A refund request flips a `completed` contribution to `refund_pending`
//! before the gateway call so two operators racing on the same record cannot
//! both initiate a reversal. The gateway's synchronous acceptance only means
//! "queued"; the money moves (and the ledger is debited) when the reversal
//! callback lands in the reconciler. There is no retry loop: a failed
//! initiation parks the record in `refund_failed` for a human to re-trigger.

use crate::database::error::StoreError;
use crate::database::store::{Contribution, ContributionStatus, ContributionStore, Transition};
use crate::payments::error::GatewayError;
use crate::payments::gateway::PaymentGateway;
use crate::payments::types::ReversalRequest;
use crate::services::notification::NotificationSink;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RefundError {
    #[error("Contribution not found: {id}")]
    NotFound { id: Uuid },

    #[error("Contribution cannot be refunded from state '{}'", state.as_str())]
    NotRefundable { state: ContributionStatus },

    #[error("Contribution has no settlement receipt to reverse")]
    MissingReceipt,

    #[error("No refund has been requested for this contribution")]
    NoRefundAttempt,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of an accepted refund request.
#[derive(Debug)]
pub struct RefundInitiated {
    pub contribution: Contribution,
    /// Advisory completion window reported to the operator.
    pub advisory_window: Duration,
}

/// Snapshot of an in-flight or finished refund.
#[derive(Debug)]
pub struct RefundStatus {
    pub contribution: Contribution,
    pub elapsed: Duration,
    /// The advisory window has passed without a terminal callback. Advisory
    /// only; not a correctness signal.
    pub overdue: bool,
}

pub struct RefundService {
    store: Arc<dyn ContributionStore>,
    gateway: Arc<dyn PaymentGateway>,
    advisory_window: Duration,
    notifier: NotificationSink,
}

impl RefundService {
    pub fn new(
        store: Arc<dyn ContributionStore>,
        gateway: Arc<dyn PaymentGateway>,
        advisory_window: Duration,
        notifier: NotificationSink,
    ) -> Self {
        Self {
            store,
            gateway,
            advisory_window,
            notifier,
        }
    }

    pub async fn request_refund(
        &self,
        contribution_id: Uuid,
        reason: &str,
        admin_id: &str,
    ) -> Result<RefundInitiated, RefundError> {
        let contribution = self
            .store
            .find_by_id(contribution_id)
            .await?
            .ok_or(RefundError::NotFound {
                id: contribution_id,
            })?;

        if contribution.status != ContributionStatus::Completed {
            return Err(RefundError::NotRefundable {
                state: contribution.status,
            });
        }
        let receipt = contribution
            .mpesa_receipt
            .clone()
            .ok_or(RefundError::MissingReceipt)?;

        // Claim the record before talking to the gateway; a concurrent
        // request loses the CAS and is reported the state it observed.
        let claimed = match self.store.begin_refund(contribution_id, reason).await? {
            Transition::Applied(claimed) => claimed,
            Transition::Skipped { current } => {
                return Err(RefundError::NotRefundable { state: current });
            }
        };

        info!(
            contribution_id = %contribution_id,
            admin_id = %admin_id,
            receipt = %receipt,
            "Refund requested, initiating reversal"
        );

        let reversal = ReversalRequest {
            transaction_id: receipt,
            amount: claimed.amount.clone(),
            remarks: reason.to_string(),
        };
        match self.gateway.initiate_reversal(&reversal).await {
            Ok(initiation) => {
                let updated = self
                    .store
                    .record_reversal_initiated(
                        contribution_id,
                        &initiation.originator_conversation_id,
                        &initiation.conversation_id,
                    )
                    .await?;
                self.notifier.publish(&updated);
                Ok(RefundInitiated {
                    contribution: updated,
                    advisory_window: self.advisory_window,
                })
            }
            Err(e) => {
                warn!(
                    contribution_id = %contribution_id,
                    "Reversal initiation failed: {}",
                    e
                );
                let transition = self
                    .store
                    .mark_refund_failed_at_initiation(contribution_id, &e.to_string())
                    .await?;
                if let Transition::Applied(updated) = transition {
                    self.notifier.publish(&updated);
                }
                Err(RefundError::Gateway(e))
            }
        }
    }

    pub async fn refund_status(
        &self,
        contribution_id: Uuid,
    ) -> Result<RefundStatus, RefundError> {
        let contribution = self
            .store
            .find_by_id(contribution_id)
            .await?
            .ok_or(RefundError::NotFound {
                id: contribution_id,
            })?;

        let requested_at = contribution
            .reversal_requested_at
            .ok_or(RefundError::NoRefundAttempt)?;

        let elapsed = (Utc::now() - requested_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let overdue =
            contribution.status == ContributionStatus::RefundPending && elapsed > self.advisory_window;

        Ok(RefundStatus {
            contribution,
            elapsed,
            overdue,
        })
    }
}
