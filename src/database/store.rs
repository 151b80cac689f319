//! Contribution persistence contract.
//!
//! All state transitions go through this trait so the reconciler and refund
//! orchestrator can be tested against the in-memory implementation. Every
//! transition method is a compare-and-set: it succeeds only from the expected
//! prior state and reports `Transition::Skipped` otherwise, which is how
//! duplicate callback deliveries become no-ops.

use crate::database::error::StoreError;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionStatus {
    Pending,
    Completed,
    Failed,
    RefundPending,
    Refunded,
    RefundFailed,
}

impl ContributionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContributionStatus::Pending => "pending",
            ContributionStatus::Completed => "completed",
            ContributionStatus::Failed => "failed",
            ContributionStatus::RefundPending => "refund_pending",
            ContributionStatus::Refunded => "refunded",
            ContributionStatus::RefundFailed => "refund_failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(ContributionStatus::Pending),
            "completed" => Some(ContributionStatus::Completed),
            "failed" => Some(ContributionStatus::Failed),
            "refund_pending" => Some(ContributionStatus::RefundPending),
            "refunded" => Some(ContributionStatus::Refunded),
            "refund_failed" => Some(ContributionStatus::RefundFailed),
            _ => None,
        }
    }

    /// States in which a refund request is no longer (or not yet) possible.
    pub fn is_refund_state(&self) -> bool {
        matches!(
            self,
            ContributionStatus::RefundPending
                | ContributionStatus::Refunded
                | ContributionStatus::RefundFailed
        )
    }
}

#[derive(Debug, Clone)]
pub struct Contribution {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub contributor_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: ContributionStatus,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub mpesa_receipt: Option<String>,
    pub phone_number: String,
    pub is_anonymous: bool,
    pub note: Option<String>,
    pub result_code: Option<i64>,
    pub result_desc: Option<String>,
    pub source_channel: Option<String>,
    pub reversal_originator_id: Option<String>,
    pub reversal_conversation_id: Option<String>,
    pub reversal_reason: Option<String>,
    pub reversal_requested_at: Option<DateTime<Utc>>,
    pub reversal_completed_at: Option<DateTime<Utc>>,
    pub reversal_result_code: Option<i64>,
    pub reversal_result_desc: Option<String>,
    pub reversal_detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

/// Fields the caller supplies when recording a new contribution.
#[derive(Debug, Clone)]
pub struct NewContribution {
    pub campaign_id: Uuid,
    pub contributor_id: Option<Uuid>,
    pub phone_number: String,
    pub amount: BigDecimal,
    pub is_anonymous: bool,
    pub note: Option<String>,
    pub source_channel: Option<String>,
}

/// Settlement facts from a successful charge callback or status query.
///
/// The receipt is absent when the settlement was confirmed by a status query
/// rather than a callback.
#[derive(Debug, Clone)]
pub struct ChargeSettlement {
    pub receipt: Option<String>,
    pub phone_number: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
    pub result_code: i64,
    pub result_desc: String,
}

/// Terminal facts from a reversal result callback.
#[derive(Debug, Clone)]
pub struct ReversalOutcome {
    pub result_code: i64,
    pub result_desc: String,
    /// Raw result parameters, retained for operators.
    pub detail: Option<serde_json::Value>,
}

/// Result of a compare-and-set transition.
#[derive(Debug, Clone)]
pub enum Transition {
    Applied(Contribution),
    /// The record was not in the expected prior state; nothing changed.
    Skipped { current: ContributionStatus },
}

#[async_trait]
pub trait ContributionStore: Send + Sync {
    async fn create(&self, new: NewContribution) -> Result<Contribution, StoreError>;

    /// Record the gateway correlation ids after the charge was accepted.
    async fn attach_checkout_ids(
        &self,
        id: Uuid,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<Contribution, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Contribution>, StoreError>;

    async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Contribution>, StoreError>;

    async fn find_by_reversal_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Contribution>, StoreError>;

    async fn find_by_reversal_originator(
        &self,
        originator_id: &str,
    ) -> Result<Option<Contribution>, StoreError>;

    async fn find_refund_pending_by_receipt(
        &self,
        receipt: &str,
    ) -> Result<Option<Contribution>, StoreError>;

    /// Most recently updated `refund_pending` record inside the recency
    /// window. Last-resort reversal matching only.
    async fn latest_refund_pending_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Contribution>, StoreError>;

    /// `pending` -> `completed`, crediting the campaign total with the
    /// stored amount in the same transaction.
    async fn mark_completed(
        &self,
        id: Uuid,
        settlement: &ChargeSettlement,
    ) -> Result<Transition, StoreError>;

    /// `pending` -> `failed`.
    async fn mark_failed(
        &self,
        id: Uuid,
        result_code: i64,
        result_desc: &str,
    ) -> Result<Transition, StoreError>;

    /// `completed` -> `refund_pending`, recording the operator's reason.
    async fn begin_refund(&self, id: Uuid, reason: &str) -> Result<Transition, StoreError>;

    /// Record the conversation ids once the gateway accepted the reversal.
    async fn record_reversal_initiated(
        &self,
        id: Uuid,
        originator_conversation_id: &str,
        conversation_id: &str,
    ) -> Result<Contribution, StoreError>;

    /// `refund_pending` -> `refund_failed` when the gateway refused the
    /// reversal at initiation.
    async fn mark_refund_failed_at_initiation(
        &self,
        id: Uuid,
        error_desc: &str,
    ) -> Result<Transition, StoreError>;

    /// `refund_pending` -> `refunded`, debiting the campaign total (clamped
    /// at zero) in the same transaction.
    async fn mark_refunded(
        &self,
        id: Uuid,
        outcome: &ReversalOutcome,
    ) -> Result<Transition, StoreError>;

    /// `refund_pending` -> `refund_failed` from a failed reversal callback.
    async fn mark_refund_failed(
        &self,
        id: Uuid,
        outcome: &ReversalOutcome,
    ) -> Result<Transition, StoreError>;

    /// Current `funds_raised` for a campaign.
    async fn campaign_total(&self, campaign_id: Uuid) -> Result<BigDecimal, StoreError>;
}
