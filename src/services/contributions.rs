//! Contribution intake and manual status resolution.
//!
//! The initiation path never moves money: it records a `pending` row and
//! asks the gateway to prompt the payer. Settlement only happens in the
//! reconciler when the callback arrives, or through the manual status poll
//! for records whose callback never came.

use crate::database::error::StoreError;
use crate::database::store::{
    ChargeSettlement, Contribution, ContributionStatus, ContributionStore, NewContribution,
    Transition,
};
use crate::payments::error::GatewayError;
use crate::payments::gateway::PaymentGateway;
use crate::payments::phone::{normalize_phone, validate_amount};
use crate::payments::types::ChargeRequest;
use crate::services::notification::NotificationSink;
use bigdecimal::BigDecimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ContributionError {
    #[error("Contribution not found: {id}")]
    NotFound { id: Uuid },

    #[error(transparent)]
    Validation(GatewayError),

    /// The gateway call failed after the record was created. The record's
    /// state tells the caller whether a retry needs a new contribution.
    #[error(transparent)]
    Gateway(GatewayError),

    #[error("Contribution in state '{}' cannot be polled", state.as_str())]
    NotPollable { state: ContributionStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fields accepted from the platform when starting a contribution.
#[derive(Debug, Clone)]
pub struct ContributionRequest {
    pub campaign_id: Uuid,
    pub contributor_id: Option<Uuid>,
    pub phone_number: String,
    pub amount: BigDecimal,
    pub is_anonymous: bool,
    pub note: Option<String>,
    pub source_channel: Option<String>,
}

pub struct ContributionService {
    store: Arc<dyn ContributionStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: NotificationSink,
    max_charge_amount: u64,
}

impl ContributionService {
    pub fn new(
        store: Arc<dyn ContributionStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: NotificationSink,
        max_charge_amount: u64,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            max_charge_amount,
        }
    }

    /// Create a `pending` contribution and prompt the payer's phone.
    ///
    /// A gateway rejection is definitive and marks the record `failed`; a
    /// timeout or outage leaves it `pending` for the callback or a manual
    /// poll to resolve.
    pub async fn create_contribution(
        &self,
        request: ContributionRequest,
    ) -> Result<Contribution, ContributionError> {
        // Validate before creating the record so bad input never leaves a
        // stray pending row.
        let phone = normalize_phone(&request.phone_number)
            .map_err(ContributionError::Validation)?;
        validate_amount(&request.amount, self.max_charge_amount)
            .map_err(ContributionError::Validation)?;

        let contribution = self
            .store
            .create(NewContribution {
                campaign_id: request.campaign_id,
                contributor_id: request.contributor_id,
                phone_number: phone.clone(),
                amount: request.amount.clone(),
                is_anonymous: request.is_anonymous,
                note: request.note,
                source_channel: request.source_channel,
            })
            .await?;

        let charge = ChargeRequest {
            phone_number: phone,
            amount: request.amount,
            reference: contribution.id.to_string(),
            description: "Campaign contribution".to_string(),
        };

        match self.gateway.initiate_charge(&charge).await {
            Ok(initiation) => {
                let updated = self
                    .store
                    .attach_checkout_ids(
                        contribution.id,
                        &initiation.merchant_request_id,
                        &initiation.checkout_request_id,
                    )
                    .await?;
                info!(
                    contribution_id = %updated.id,
                    checkout_request_id = %initiation.checkout_request_id,
                    "STK push accepted, awaiting callback"
                );
                Ok(updated)
            }
            Err(e @ GatewayError::Rejected { .. }) => {
                // Definitive upstream refusal at initiation time.
                let _ = self
                    .store
                    .mark_failed(contribution.id, -1, &e.to_string())
                    .await?;
                Err(ContributionError::Gateway(e))
            }
            Err(e) => {
                warn!(
                    contribution_id = %contribution.id,
                    "Charge initiation inconclusive, leaving record pending: {}",
                    e
                );
                Err(ContributionError::Gateway(e))
            }
        }
    }

    pub async fn get_contribution(&self, id: Uuid) -> Result<Contribution, ContributionError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(ContributionError::NotFound { id })
    }

    /// Resolve a stuck `pending` contribution by querying the gateway.
    ///
    /// The query result flows through the same transition path a callback
    /// would take, so a callback landing concurrently loses nothing: one of
    /// the two applies the transition and the other is a no-op.
    pub async fn poll_charge_status(&self, id: Uuid) -> Result<Contribution, ContributionError> {
        let contribution = self.get_contribution(id).await?;

        if contribution.status != ContributionStatus::Pending {
            return Err(ContributionError::NotPollable {
                state: contribution.status,
            });
        }
        let checkout_request_id = contribution
            .checkout_request_id
            .clone()
            .ok_or(ContributionError::NotPollable {
                state: contribution.status,
            })?;

        let status = self
            .gateway
            .query_charge_status(&checkout_request_id)
            .await
            .map_err(ContributionError::Gateway)?;

        let transition = if status.result_code == 0 {
            // No receipt is available from the query endpoint; the record
            // settles without one.
            self.store
                .mark_completed(
                    id,
                    &ChargeSettlement {
                        receipt: None,
                        phone_number: None,
                        settled_at: None,
                        result_code: status.result_code,
                        result_desc: status.result_desc,
                    },
                )
                .await?
        } else {
            self.store
                .mark_failed(id, status.result_code, &status.result_desc)
                .await?
        };

        match transition {
            Transition::Applied(updated) => {
                info!(
                    contribution_id = %updated.id,
                    status = updated.status.as_str(),
                    "Manual status poll resolved contribution"
                );
                self.notifier.publish(&updated);
                Ok(updated)
            }
            // A callback won the race; report the state it produced.
            Transition::Skipped { .. } => self.get_contribution(id).await,
        }
    }
}
