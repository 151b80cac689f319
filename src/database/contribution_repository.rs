//! Postgres-backed contribution store.
//!
//! Transitions are compare-and-set UPDATEs keyed on the expected prior
//! status, run in the same transaction as the campaign ledger increment, so
//! a duplicate callback can never double-credit: the second CAS matches zero
//! rows and the ledger statement never runs.

use crate::database::error::StoreError;
use crate::database::store::{
    ChargeSettlement, Contribution, ContributionStatus, ContributionStore, NewContribution,
    ReversalOutcome, Transition,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct ContributionRow {
    id: Uuid,
    campaign_id: Uuid,
    contributor_id: Option<Uuid>,
    amount: BigDecimal,
    currency: String,
    status: String,
    merchant_request_id: Option<String>,
    checkout_request_id: Option<String>,
    mpesa_receipt: Option<String>,
    phone_number: String,
    is_anonymous: bool,
    note: Option<String>,
    result_code: Option<i64>,
    result_desc: Option<String>,
    source_channel: Option<String>,
    reversal_originator_id: Option<String>,
    reversal_conversation_id: Option<String>,
    reversal_reason: Option<String>,
    reversal_requested_at: Option<DateTime<Utc>>,
    reversal_completed_at: Option<DateTime<Utc>>,
    reversal_result_code: Option<i64>,
    reversal_result_desc: Option<String>,
    reversal_detail: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
}

impl TryFrom<ContributionRow> for Contribution {
    type Error = StoreError;

    fn try_from(row: ContributionRow) -> Result<Self, StoreError> {
        let status = ContributionStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Backend(format!("unknown status '{}'", row.status)))?;
        Ok(Contribution {
            id: row.id,
            campaign_id: row.campaign_id,
            contributor_id: row.contributor_id,
            amount: row.amount,
            currency: row.currency,
            status,
            merchant_request_id: row.merchant_request_id,
            checkout_request_id: row.checkout_request_id,
            mpesa_receipt: row.mpesa_receipt,
            phone_number: row.phone_number,
            is_anonymous: row.is_anonymous,
            note: row.note,
            result_code: row.result_code,
            result_desc: row.result_desc,
            source_channel: row.source_channel,
            reversal_originator_id: row.reversal_originator_id,
            reversal_conversation_id: row.reversal_conversation_id,
            reversal_reason: row.reversal_reason,
            reversal_requested_at: row.reversal_requested_at,
            reversal_completed_at: row.reversal_completed_at,
            reversal_result_code: row.reversal_result_code,
            reversal_result_desc: row.reversal_result_desc,
            reversal_detail: row.reversal_detail,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processed_at: row.processed_at,
            refunded_at: row.refunded_at,
        })
    }
}

pub struct PgContributionStore {
    pool: PgPool,
}

impl PgContributionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_by(
        &self,
        sql: &str,
        bind: &str,
    ) -> Result<Option<Contribution>, StoreError> {
        let row = sqlx::query_as::<_, ContributionRow>(sql)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        row.map(Contribution::try_from).transpose()
    }

    /// Current status of a record, for reporting a skipped CAS.
    async fn current_status(&self, id: Uuid) -> Result<ContributionStatus, StoreError> {
        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM contributions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;
        let (raw,) = status.ok_or(StoreError::NotFound { id })?;
        ContributionStatus::parse(&raw)
            .ok_or_else(|| StoreError::Backend(format!("unknown status '{}'", raw)))
    }
}

async fn credit_campaign(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    campaign_id: Uuid,
    amount: &BigDecimal,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE campaigns SET funds_raised = funds_raised + $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(campaign_id)
    .bind(amount)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::from_sqlx)?;
    if result.rows_affected() == 0 {
        warn!(campaign_id = %campaign_id, "Ledger credit matched no campaign row");
    }
    Ok(())
}

async fn debit_campaign(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    campaign_id: Uuid,
    amount: &BigDecimal,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE campaigns
         SET funds_raised = GREATEST(funds_raised - $2, 0), updated_at = NOW()
         WHERE id = $1",
    )
    .bind(campaign_id)
    .bind(amount)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::from_sqlx)?;
    if result.rows_affected() == 0 {
        warn!(campaign_id = %campaign_id, "Ledger debit matched no campaign row");
    }
    Ok(())
}

#[async_trait]
impl ContributionStore for PgContributionStore {
    async fn create(&self, new: NewContribution) -> Result<Contribution, StoreError> {
        let row = sqlx::query_as::<_, ContributionRow>(
            "INSERT INTO contributions
                 (id, campaign_id, contributor_id, amount, currency, status,
                  phone_number, is_anonymous, note, source_channel)
             VALUES ($1, $2, $3, $4, 'KES', 'pending', $5, $6, $7, $8)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(new.campaign_id)
        .bind(new.contributor_id)
        .bind(&new.amount)
        .bind(&new.phone_number)
        .bind(new.is_anonymous)
        .bind(&new.note)
        .bind(&new.source_channel)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Contribution::try_from(row)
    }

    async fn attach_checkout_ids(
        &self,
        id: Uuid,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<Contribution, StoreError> {
        let row = sqlx::query_as::<_, ContributionRow>(
            "UPDATE contributions
             SET merchant_request_id = $2, checkout_request_id = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(merchant_request_id)
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?
        .ok_or(StoreError::NotFound { id })?;
        Contribution::try_from(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Contribution>, StoreError> {
        let row = sqlx::query_as::<_, ContributionRow>(
            "SELECT * FROM contributions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        row.map(Contribution::try_from).transpose()
    }

    async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Contribution>, StoreError> {
        self.fetch_one_by(
            "SELECT * FROM contributions WHERE checkout_request_id = $1",
            checkout_request_id,
        )
        .await
    }

    async fn find_by_reversal_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Contribution>, StoreError> {
        self.fetch_one_by(
            "SELECT * FROM contributions WHERE reversal_conversation_id = $1",
            conversation_id,
        )
        .await
    }

    async fn find_by_reversal_originator(
        &self,
        originator_id: &str,
    ) -> Result<Option<Contribution>, StoreError> {
        self.fetch_one_by(
            "SELECT * FROM contributions WHERE reversal_originator_id = $1",
            originator_id,
        )
        .await
    }

    async fn find_refund_pending_by_receipt(
        &self,
        receipt: &str,
    ) -> Result<Option<Contribution>, StoreError> {
        self.fetch_one_by(
            "SELECT * FROM contributions
             WHERE mpesa_receipt = $1 AND status = 'refund_pending'",
            receipt,
        )
        .await
    }

    async fn latest_refund_pending_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Contribution>, StoreError> {
        let row = sqlx::query_as::<_, ContributionRow>(
            "SELECT * FROM contributions
             WHERE status = 'refund_pending' AND reversal_requested_at >= $1
             ORDER BY reversal_requested_at DESC
             LIMIT 1",
        )
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        row.map(Contribution::try_from).transpose()
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        settlement: &ChargeSettlement,
    ) -> Result<Transition, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        let row = sqlx::query_as::<_, ContributionRow>(
            "UPDATE contributions
             SET status = 'completed',
                 mpesa_receipt = $2,
                 phone_number = COALESCE($3, phone_number),
                 result_code = $4,
                 result_desc = $5,
                 processed_at = COALESCE($6, NOW()),
                 updated_at = NOW()
             WHERE id = $1 AND status = 'pending'
             RETURNING *",
        )
        .bind(id)
        .bind(&settlement.receipt)
        .bind(&settlement.phone_number)
        .bind(settlement.result_code)
        .bind(&settlement.result_desc)
        .bind(settlement.settled_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        match row {
            Some(row) => {
                let contribution = Contribution::try_from(row)?;
                // The stored amount is the credit; callback echoes are not.
                credit_campaign(&mut tx, contribution.campaign_id, &contribution.amount)
                    .await?;
                tx.commit().await.map_err(StoreError::from_sqlx)?;
                Ok(Transition::Applied(contribution))
            }
            None => {
                tx.rollback().await.map_err(StoreError::from_sqlx)?;
                Ok(Transition::Skipped {
                    current: self.current_status(id).await?,
                })
            }
        }
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        result_code: i64,
        result_desc: &str,
    ) -> Result<Transition, StoreError> {
        let row = sqlx::query_as::<_, ContributionRow>(
            "UPDATE contributions
             SET status = 'failed', result_code = $2, result_desc = $3,
                 processed_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND status = 'pending'
             RETURNING *",
        )
        .bind(id)
        .bind(result_code)
        .bind(result_desc)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        match row {
            Some(row) => Ok(Transition::Applied(Contribution::try_from(row)?)),
            None => Ok(Transition::Skipped {
                current: self.current_status(id).await?,
            }),
        }
    }

    async fn begin_refund(&self, id: Uuid, reason: &str) -> Result<Transition, StoreError> {
        let row = sqlx::query_as::<_, ContributionRow>(
            "UPDATE contributions
             SET status = 'refund_pending', reversal_reason = $2,
                 reversal_requested_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND status = 'completed'
             RETURNING *",
        )
        .bind(id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        match row {
            Some(row) => Ok(Transition::Applied(Contribution::try_from(row)?)),
            None => Ok(Transition::Skipped {
                current: self.current_status(id).await?,
            }),
        }
    }

    async fn record_reversal_initiated(
        &self,
        id: Uuid,
        originator_conversation_id: &str,
        conversation_id: &str,
    ) -> Result<Contribution, StoreError> {
        let row = sqlx::query_as::<_, ContributionRow>(
            "UPDATE contributions
             SET reversal_originator_id = $2, reversal_conversation_id = $3,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(originator_conversation_id)
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?
        .ok_or(StoreError::NotFound { id })?;
        Contribution::try_from(row)
    }

    async fn mark_refund_failed_at_initiation(
        &self,
        id: Uuid,
        error_desc: &str,
    ) -> Result<Transition, StoreError> {
        let row = sqlx::query_as::<_, ContributionRow>(
            "UPDATE contributions
             SET status = 'refund_failed', reversal_result_desc = $2,
                 reversal_completed_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND status = 'refund_pending'
             RETURNING *",
        )
        .bind(id)
        .bind(error_desc)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        match row {
            Some(row) => Ok(Transition::Applied(Contribution::try_from(row)?)),
            None => Ok(Transition::Skipped {
                current: self.current_status(id).await?,
            }),
        }
    }

    async fn mark_refunded(
        &self,
        id: Uuid,
        outcome: &ReversalOutcome,
    ) -> Result<Transition, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        let row = sqlx::query_as::<_, ContributionRow>(
            "UPDATE contributions
             SET status = 'refunded', reversal_result_code = $2,
                 reversal_result_desc = $3, reversal_detail = $4,
                 reversal_completed_at = NOW(), refunded_at = NOW(),
                 updated_at = NOW()
             WHERE id = $1 AND status = 'refund_pending'
             RETURNING *",
        )
        .bind(id)
        .bind(outcome.result_code)
        .bind(&outcome.result_desc)
        .bind(&outcome.detail)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        match row {
            Some(row) => {
                let contribution = Contribution::try_from(row)?;
                debit_campaign(&mut tx, contribution.campaign_id, &contribution.amount)
                    .await?;
                tx.commit().await.map_err(StoreError::from_sqlx)?;
                Ok(Transition::Applied(contribution))
            }
            None => {
                tx.rollback().await.map_err(StoreError::from_sqlx)?;
                Ok(Transition::Skipped {
                    current: self.current_status(id).await?,
                })
            }
        }
    }

    async fn mark_refund_failed(
        &self,
        id: Uuid,
        outcome: &ReversalOutcome,
    ) -> Result<Transition, StoreError> {
        let row = sqlx::query_as::<_, ContributionRow>(
            "UPDATE contributions
             SET status = 'refund_failed', reversal_result_code = $2,
                 reversal_result_desc = $3, reversal_detail = $4,
                 reversal_completed_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND status = 'refund_pending'
             RETURNING *",
        )
        .bind(id)
        .bind(outcome.result_code)
        .bind(&outcome.result_desc)
        .bind(&outcome.detail)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        match row {
            Some(row) => Ok(Transition::Applied(Contribution::try_from(row)?)),
            None => Ok(Transition::Skipped {
                current: self.current_status(id).await?,
            }),
        }
    }

    async fn campaign_total(&self, campaign_id: Uuid) -> Result<BigDecimal, StoreError> {
        let total: Option<(BigDecimal,)> =
            sqlx::query_as("SELECT funds_raised FROM campaigns WHERE id = $1")
                .bind(campaign_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;
        Ok(total.map(|(t,)| t).unwrap_or_else(|| BigDecimal::from(0)))
    }
}
