//! In-memory contribution store.
//!
//! Mirrors the Postgres implementation's compare-and-set semantics behind a
//! single async mutex. Used by the test suite and when the service runs
//! without a `DATABASE_URL` (local development against the gateway sandbox).

use crate::database::error::StoreError;
use crate::database::store::{
    ChargeSettlement, Contribution, ContributionStatus, ContributionStore, NewContribution,
    ReversalOutcome, Transition,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    contributions: HashMap<Uuid, Contribution>,
    ledgers: HashMap<Uuid, BigDecimal>,
}

#[derive(Default)]
pub struct MemoryContributionStore {
    inner: Mutex<Inner>,
}

impl MemoryContributionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn find_where<F>(inner: &Inner, predicate: F) -> Option<Contribution>
where
    F: Fn(&Contribution) -> bool,
{
    inner.contributions.values().find(|c| predicate(c)).cloned()
}

#[async_trait]
impl ContributionStore for MemoryContributionStore {
    async fn create(&self, new: NewContribution) -> Result<Contribution, StoreError> {
        let now = Utc::now();
        let contribution = Contribution {
            id: Uuid::new_v4(),
            campaign_id: new.campaign_id,
            contributor_id: new.contributor_id,
            amount: new.amount,
            currency: "KES".to_string(),
            status: ContributionStatus::Pending,
            merchant_request_id: None,
            checkout_request_id: None,
            mpesa_receipt: None,
            phone_number: new.phone_number,
            is_anonymous: new.is_anonymous,
            note: new.note,
            result_code: None,
            result_desc: None,
            source_channel: new.source_channel,
            reversal_originator_id: None,
            reversal_conversation_id: None,
            reversal_reason: None,
            reversal_requested_at: None,
            reversal_completed_at: None,
            reversal_result_code: None,
            reversal_result_desc: None,
            reversal_detail: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            refunded_at: None,
        };
        let mut inner = self.inner.lock().await;
        inner.contributions.insert(contribution.id, contribution.clone());
        Ok(contribution)
    }

    async fn attach_checkout_ids(
        &self,
        id: Uuid,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<Contribution, StoreError> {
        let mut inner = self.inner.lock().await;
        let contribution = inner
            .contributions
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;
        contribution.merchant_request_id = Some(merchant_request_id.to_string());
        contribution.checkout_request_id = Some(checkout_request_id.to_string());
        contribution.updated_at = Utc::now();
        Ok(contribution.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Contribution>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.contributions.get(&id).cloned())
    }

    async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Contribution>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(find_where(&inner, |c| {
            c.checkout_request_id.as_deref() == Some(checkout_request_id)
        }))
    }

    async fn find_by_reversal_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Contribution>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(find_where(&inner, |c| {
            c.reversal_conversation_id.as_deref() == Some(conversation_id)
        }))
    }

    async fn find_by_reversal_originator(
        &self,
        originator_id: &str,
    ) -> Result<Option<Contribution>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(find_where(&inner, |c| {
            c.reversal_originator_id.as_deref() == Some(originator_id)
        }))
    }

    async fn find_refund_pending_by_receipt(
        &self,
        receipt: &str,
    ) -> Result<Option<Contribution>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(find_where(&inner, |c| {
            c.status == ContributionStatus::RefundPending
                && c.mpesa_receipt.as_deref() == Some(receipt)
        }))
    }

    async fn latest_refund_pending_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Contribution>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .contributions
            .values()
            .filter(|c| {
                c.status == ContributionStatus::RefundPending
                    && c.reversal_requested_at.is_some_and(|t| t >= cutoff)
            })
            .max_by_key(|c| c.reversal_requested_at)
            .cloned())
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        settlement: &ChargeSettlement,
    ) -> Result<Transition, StoreError> {
        let mut inner = self.inner.lock().await;
        let current = {
            let contribution = inner
                .contributions
                .get(&id)
                .ok_or(StoreError::NotFound { id })?;
            contribution.status
        };
        if current != ContributionStatus::Pending {
            return Ok(Transition::Skipped { current });
        }

        let updated = {
            let contribution = inner
                .contributions
                .get_mut(&id)
                .ok_or(StoreError::NotFound { id })?;
            contribution.status = ContributionStatus::Completed;
            contribution.mpesa_receipt = settlement.receipt.clone();
            if let Some(phone) = &settlement.phone_number {
                contribution.phone_number = phone.clone();
            }
            contribution.result_code = Some(settlement.result_code);
            contribution.result_desc = Some(settlement.result_desc.clone());
            contribution.processed_at = Some(settlement.settled_at.unwrap_or_else(Utc::now));
            contribution.updated_at = Utc::now();
            contribution.clone()
        };

        let total = inner
            .ledgers
            .entry(updated.campaign_id)
            .or_insert_with(|| BigDecimal::from(0));
        *total += updated.amount.clone();
        Ok(Transition::Applied(updated))
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        result_code: i64,
        result_desc: &str,
    ) -> Result<Transition, StoreError> {
        let mut inner = self.inner.lock().await;
        let contribution = inner
            .contributions
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;
        if contribution.status != ContributionStatus::Pending {
            return Ok(Transition::Skipped {
                current: contribution.status,
            });
        }
        contribution.status = ContributionStatus::Failed;
        contribution.result_code = Some(result_code);
        contribution.result_desc = Some(result_desc.to_string());
        contribution.processed_at = Some(Utc::now());
        contribution.updated_at = Utc::now();
        Ok(Transition::Applied(contribution.clone()))
    }

    async fn begin_refund(&self, id: Uuid, reason: &str) -> Result<Transition, StoreError> {
        let mut inner = self.inner.lock().await;
        let contribution = inner
            .contributions
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;
        if contribution.status != ContributionStatus::Completed {
            return Ok(Transition::Skipped {
                current: contribution.status,
            });
        }
        contribution.status = ContributionStatus::RefundPending;
        contribution.reversal_reason = Some(reason.to_string());
        contribution.reversal_requested_at = Some(Utc::now());
        contribution.updated_at = Utc::now();
        Ok(Transition::Applied(contribution.clone()))
    }

    async fn record_reversal_initiated(
        &self,
        id: Uuid,
        originator_conversation_id: &str,
        conversation_id: &str,
    ) -> Result<Contribution, StoreError> {
        let mut inner = self.inner.lock().await;
        let contribution = inner
            .contributions
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;
        contribution.reversal_originator_id = Some(originator_conversation_id.to_string());
        contribution.reversal_conversation_id = Some(conversation_id.to_string());
        contribution.updated_at = Utc::now();
        Ok(contribution.clone())
    }

    async fn mark_refund_failed_at_initiation(
        &self,
        id: Uuid,
        error_desc: &str,
    ) -> Result<Transition, StoreError> {
        let mut inner = self.inner.lock().await;
        let contribution = inner
            .contributions
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;
        if contribution.status != ContributionStatus::RefundPending {
            return Ok(Transition::Skipped {
                current: contribution.status,
            });
        }
        contribution.status = ContributionStatus::RefundFailed;
        contribution.reversal_result_desc = Some(error_desc.to_string());
        contribution.reversal_completed_at = Some(Utc::now());
        contribution.updated_at = Utc::now();
        Ok(Transition::Applied(contribution.clone()))
    }

    async fn mark_refunded(
        &self,
        id: Uuid,
        outcome: &ReversalOutcome,
    ) -> Result<Transition, StoreError> {
        let mut inner = self.inner.lock().await;
        let current = {
            let contribution = inner
                .contributions
                .get(&id)
                .ok_or(StoreError::NotFound { id })?;
            contribution.status
        };
        if current != ContributionStatus::RefundPending {
            return Ok(Transition::Skipped { current });
        }

        let updated = {
            let contribution = inner
                .contributions
                .get_mut(&id)
                .ok_or(StoreError::NotFound { id })?;
            contribution.status = ContributionStatus::Refunded;
            contribution.reversal_result_code = Some(outcome.result_code);
            contribution.reversal_result_desc = Some(outcome.result_desc.clone());
            contribution.reversal_detail = outcome.detail.clone();
            contribution.reversal_completed_at = Some(Utc::now());
            contribution.refunded_at = Some(Utc::now());
            contribution.updated_at = Utc::now();
            contribution.clone()
        };

        let total = inner
            .ledgers
            .entry(updated.campaign_id)
            .or_insert_with(|| BigDecimal::from(0));
        *total -= updated.amount.clone();
        if *total < BigDecimal::from(0) {
            *total = BigDecimal::from(0);
        }
        Ok(Transition::Applied(updated))
    }

    async fn mark_refund_failed(
        &self,
        id: Uuid,
        outcome: &ReversalOutcome,
    ) -> Result<Transition, StoreError> {
        let mut inner = self.inner.lock().await;
        let contribution = inner
            .contributions
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;
        if contribution.status != ContributionStatus::RefundPending {
            return Ok(Transition::Skipped {
                current: contribution.status,
            });
        }
        contribution.status = ContributionStatus::RefundFailed;
        contribution.reversal_result_code = Some(outcome.result_code);
        contribution.reversal_result_desc = Some(outcome.result_desc.clone());
        contribution.reversal_detail = outcome.detail.clone();
        contribution.reversal_completed_at = Some(Utc::now());
        contribution.updated_at = Utc::now();
        Ok(Transition::Applied(contribution.clone()))
    }

    async fn campaign_total(&self, campaign_id: Uuid) -> Result<BigDecimal, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .ledgers
            .get(&campaign_id)
            .cloned()
            .unwrap_or_else(|| BigDecimal::from(0)))
    }
}
