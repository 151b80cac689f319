//! Callback reconciliation.
//!
//! The gateway delivers charge and reversal results as an unordered,
//! at-least-once stream. This module turns that stream into idempotent state
//! transitions: every callback is classified, matched to a stored record,
//! and applied through a compare-and-set so a redelivered callback can never
//! move money twice. The HTTP layer always acknowledges receipt; the outcome
//! returned here is for logging and tests, never for the provider.

use crate::config::ReconcilerConfig;
use crate::database::error::StoreError;
use crate::database::store::{
    ChargeSettlement, Contribution, ContributionStatus, ContributionStore, ReversalOutcome,
    Transition,
};
use crate::payments::types::{
    result_code_as_i64, ChargeCallbackEnvelope, ReversalCallbackEnvelope, SettlementMetadata,
};
use crate::services::notification::NotificationSink;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

/// Reversal result codes the upstream documents as success.
const REVERSAL_SUCCESS_CODES: [i64; 2] = [0, 21];

#[derive(Debug)]
pub enum ChargeCallbackOutcome {
    /// URL-validation ping from the gateway; acknowledged without state change.
    ConnectivityTest,
    Malformed(String),
    /// No contribution carries this checkout request id.
    Unmatched(String),
    /// The record was already terminal; nothing changed.
    Duplicate(ContributionStatus),
    Completed(Contribution),
    Failed(Contribution),
}

#[derive(Debug)]
pub enum ReversalCallbackOutcome {
    Malformed(String),
    /// No record resolved through any identifier; never fabricate one.
    Orphan(String),
    Duplicate(ContributionStatus),
    Refunded(Contribution),
    RefundFailed(Contribution),
}

pub struct CallbackReconciler {
    store: Arc<dyn ContributionStore>,
    config: ReconcilerConfig,
    notifier: NotificationSink,
}

impl CallbackReconciler {
    pub fn new(
        store: Arc<dyn ContributionStore>,
        config: ReconcilerConfig,
        notifier: NotificationSink,
    ) -> Self {
        Self {
            store,
            config,
            notifier,
        }
    }

    pub async fn handle_charge_callback(
        &self,
        payload: JsonValue,
    ) -> Result<ChargeCallbackOutcome, StoreError> {
        if is_connectivity_test(&payload) {
            info!("Acknowledging gateway connectivity test");
            return Ok(ChargeCallbackOutcome::ConnectivityTest);
        }

        let envelope: ChargeCallbackEnvelope = match serde_json::from_value(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Malformed charge callback: {}", e);
                return Ok(ChargeCallbackOutcome::Malformed(e.to_string()));
            }
        };
        let callback = envelope.body.stk_callback;

        let contribution = match self
            .store
            .find_by_checkout_id(&callback.checkout_request_id)
            .await?
        {
            Some(contribution) => contribution,
            None => {
                warn!(
                    checkout_request_id = %callback.checkout_request_id,
                    "Charge callback matched no contribution"
                );
                return Ok(ChargeCallbackOutcome::Unmatched(
                    callback.checkout_request_id,
                ));
            }
        };

        if contribution.status != ContributionStatus::Pending {
            info!(
                contribution_id = %contribution.id,
                status = contribution.status.as_str(),
                "Duplicate charge callback, no state change"
            );
            return Ok(ChargeCallbackOutcome::Duplicate(contribution.status));
        }

        let result_code = match result_code_as_i64(&callback.result_code) {
            Some(code) => code,
            None => {
                warn!(
                    contribution_id = %contribution.id,
                    "Charge callback carried an unreadable result code"
                );
                return Ok(ChargeCallbackOutcome::Malformed(
                    "unreadable result code".to_string(),
                ));
            }
        };
        let result_desc = callback.result_desc.unwrap_or_default();

        if result_code == 0 {
            let metadata = callback
                .callback_metadata
                .map(|m| SettlementMetadata::from_items(&m.item))
                .unwrap_or_default();
            if metadata.receipt.is_none() {
                warn!(
                    contribution_id = %contribution.id,
                    "Successful charge callback without a receipt number"
                );
            }
            // The echoed amount and phone are untrusted; the credit uses the
            // stored amount inside the store's transaction.
            if let Some(echoed) = &metadata.amount {
                if echoed != &contribution.amount {
                    warn!(
                        contribution_id = %contribution.id,
                        stored = %contribution.amount,
                        echoed = %echoed,
                        "Callback amount differs from stored amount"
                    );
                }
            }
            let settlement = ChargeSettlement {
                receipt: metadata.receipt,
                phone_number: metadata.phone_number,
                settled_at: metadata.transaction_date,
                result_code,
                result_desc,
            };
            match self.store.mark_completed(contribution.id, &settlement).await? {
                Transition::Applied(updated) => {
                    info!(
                        contribution_id = %updated.id,
                        campaign_id = %updated.campaign_id,
                        amount = %updated.amount,
                        "Contribution completed"
                    );
                    self.notifier.publish(&updated);
                    Ok(ChargeCallbackOutcome::Completed(updated))
                }
                Transition::Skipped { current } => {
                    Ok(ChargeCallbackOutcome::Duplicate(current))
                }
            }
        } else {
            match self
                .store
                .mark_failed(contribution.id, result_code, &result_desc)
                .await?
            {
                Transition::Applied(updated) => {
                    info!(
                        contribution_id = %updated.id,
                        result_code,
                        result_desc = %result_desc,
                        "Contribution failed"
                    );
                    self.notifier.publish(&updated);
                    Ok(ChargeCallbackOutcome::Failed(updated))
                }
                Transition::Skipped { current } => {
                    Ok(ChargeCallbackOutcome::Duplicate(current))
                }
            }
        }
    }

    pub async fn handle_reversal_callback(
        &self,
        payload: JsonValue,
    ) -> Result<ReversalCallbackOutcome, StoreError> {
        let envelope: ReversalCallbackEnvelope = match serde_json::from_value(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Malformed reversal callback: {}", e);
                return Ok(ReversalCallbackOutcome::Malformed(e.to_string()));
            }
        };
        let result = envelope.result;

        let result_code = match result_code_as_i64(&result.result_code) {
            Some(code) => code,
            None => {
                warn!("Reversal callback carried an unreadable result code");
                return Ok(ReversalCallbackOutcome::Malformed(
                    "unreadable result code".to_string(),
                ));
            }
        };

        let original_receipt = result.result_parameters.as_ref().and_then(|params| {
            params
                .result_parameter
                .iter()
                .find(|p| p.key == "OriginalTransactionID")
                .and_then(|p| p.value.as_ref())
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        });

        let contribution = match self
            .resolve_reversal_target(
                result.conversation_id.as_deref(),
                result.originator_conversation_id.as_deref(),
                original_receipt.as_deref(),
            )
            .await?
        {
            Some(contribution) => contribution,
            None => {
                warn!(
                    conversation_id = ?result.conversation_id,
                    originator_id = ?result.originator_conversation_id,
                    "Orphan reversal callback, no matching record"
                );
                return Ok(ReversalCallbackOutcome::Orphan(
                    result
                        .conversation_id
                        .or(result.originator_conversation_id)
                        .unwrap_or_default(),
                ));
            }
        };

        if contribution.status != ContributionStatus::RefundPending {
            info!(
                contribution_id = %contribution.id,
                status = contribution.status.as_str(),
                "Duplicate reversal callback, no state change"
            );
            return Ok(ReversalCallbackOutcome::Duplicate(contribution.status));
        }

        let outcome = ReversalOutcome {
            result_code,
            result_desc: result.result_desc.clone().unwrap_or_default(),
            detail: result
                .result_parameters
                .as_ref()
                .and_then(|p| serde_json::to_value(RawParameters(p)).ok()),
        };

        if REVERSAL_SUCCESS_CODES.contains(&result_code) {
            match self.store.mark_refunded(contribution.id, &outcome).await? {
                Transition::Applied(updated) => {
                    info!(
                        contribution_id = %updated.id,
                        campaign_id = %updated.campaign_id,
                        amount = %updated.amount,
                        "Contribution refunded"
                    );
                    self.notifier.publish(&updated);
                    Ok(ReversalCallbackOutcome::Refunded(updated))
                }
                Transition::Skipped { current } => {
                    Ok(ReversalCallbackOutcome::Duplicate(current))
                }
            }
        } else {
            match self
                .store
                .mark_refund_failed(contribution.id, &outcome)
                .await?
            {
                Transition::Applied(updated) => {
                    warn!(
                        contribution_id = %updated.id,
                        result_code,
                        "Reversal failed upstream"
                    );
                    self.notifier.publish(&updated);
                    Ok(ReversalCallbackOutcome::RefundFailed(updated))
                }
                Transition::Skipped { current } => {
                    Ok(ReversalCallbackOutcome::Duplicate(current))
                }
            }
        }
    }

    /// Resolve the contribution a reversal callback refers to.
    ///
    /// Identifier matches are authoritative. The final recency-window match
    /// is a heuristic tolerance for the upstream omitting conversation ids;
    /// it is logged as such and disabled entirely in strict mode.
    async fn resolve_reversal_target(
        &self,
        conversation_id: Option<&str>,
        originator_id: Option<&str>,
        original_receipt: Option<&str>,
    ) -> Result<Option<Contribution>, StoreError> {
        if let Some(id) = conversation_id {
            if let Some(found) = self.store.find_by_reversal_conversation(id).await? {
                return Ok(Some(found));
            }
        }
        if let Some(id) = originator_id {
            if let Some(found) = self.store.find_by_reversal_originator(id).await? {
                return Ok(Some(found));
            }
        }
        if let Some(receipt) = original_receipt {
            if let Some(found) = self.store.find_refund_pending_by_receipt(receipt).await? {
                return Ok(Some(found));
            }
        }

        if self.config.strict_reversal_match {
            return Ok(None);
        }
        let window = chrono::Duration::from_std(self.config.reversal_match_window)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let cutoff = Utc::now() - window;
        match self.store.latest_refund_pending_since(cutoff).await? {
            Some(found) => {
                warn!(
                    contribution_id = %found.id,
                    "Reversal callback matched heuristically by recency, not by identifier"
                );
                Ok(Some(found))
            }
            None => Ok(None),
        }
    }
}

/// Wrapper so the raw result parameters serialize as stored detail.
struct RawParameters<'a>(&'a crate::payments::types::ResultParameters);

impl serde::Serialize for RawParameters<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.result_parameter.len()))?;
        for param in &self.0.result_parameter {
            map.serialize_entry(&param.key, &param.value)?;
        }
        map.end()
    }
}

/// A URL-validation ping: an empty object, or one carrying only a bare
/// result code pair with no callback envelope.
fn is_connectivity_test(payload: &JsonValue) -> bool {
    match payload.as_object() {
        Some(map) => {
            map.is_empty()
                || (!map.contains_key("Body")
                    && map
                        .keys()
                        .all(|k| k == "ResultCode" || k == "ResultDesc"))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryContributionStore;
    use crate::database::store::NewContribution;
    use bigdecimal::BigDecimal;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    fn reconciler(store: Arc<MemoryContributionStore>, strict: bool) -> CallbackReconciler {
        CallbackReconciler::new(
            store,
            ReconcilerConfig {
                reversal_match_window: Duration::from_secs(3600),
                strict_reversal_match: strict,
                refund_advisory_window: Duration::from_secs(900),
                notify_url: None,
            },
            NotificationSink::disabled(),
        )
    }

    async fn seeded_pending(
        store: &MemoryContributionStore,
        checkout_id: &str,
        amount: i64,
    ) -> Contribution {
        let created = store
            .create(NewContribution {
                campaign_id: Uuid::new_v4(),
                contributor_id: None,
                phone_number: "254712345678".to_string(),
                amount: BigDecimal::from(amount),
                is_anonymous: false,
                note: None,
                source_channel: None,
            })
            .await
            .unwrap();
        store
            .attach_checkout_ids(created.id, "29115-34620561-1", checkout_id)
            .await
            .unwrap()
    }

    fn success_charge_callback(checkout_id: &str, amount: f64) -> JsonValue {
        json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": checkout_id,
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "Amount", "Value": amount},
                            {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                            {"Name": "TransactionDate", "Value": 20260825093000_i64},
                            {"Name": "PhoneNumber", "Value": 254712345678_i64}
                        ]
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn successful_callback_completes_and_credits_once() {
        let store = Arc::new(MemoryContributionStore::new());
        let r = reconciler(store.clone(), false);
        let c = seeded_pending(&store, "ws_CO_1", 750).await;

        let outcome = r
            .handle_charge_callback(success_charge_callback("ws_CO_1", 750.0))
            .await
            .unwrap();
        assert!(matches!(outcome, ChargeCallbackOutcome::Completed(_)));
        assert_eq!(
            store.campaign_total(c.campaign_id).await.unwrap(),
            BigDecimal::from(750)
        );

        // Redelivery is a no-op.
        let dup = r
            .handle_charge_callback(success_charge_callback("ws_CO_1", 750.0))
            .await
            .unwrap();
        assert!(matches!(
            dup,
            ChargeCallbackOutcome::Duplicate(ContributionStatus::Completed)
        ));
        assert_eq!(
            store.campaign_total(c.campaign_id).await.unwrap(),
            BigDecimal::from(750)
        );
    }

    #[tokio::test]
    async fn ledger_credits_stored_amount_not_callback_echo() {
        let store = Arc::new(MemoryContributionStore::new());
        let r = reconciler(store.clone(), false);
        let c = seeded_pending(&store, "ws_CO_2", 100).await;

        r.handle_charge_callback(success_charge_callback("ws_CO_2", 99999.0))
            .await
            .unwrap();
        assert_eq!(
            store.campaign_total(c.campaign_id).await.unwrap(),
            BigDecimal::from(100)
        );
    }

    #[tokio::test]
    async fn failed_callback_marks_failed_without_credit() {
        let store = Arc::new(MemoryContributionStore::new());
        let r = reconciler(store.clone(), false);
        let c = seeded_pending(&store, "ws_CO_3", 200).await;

        let payload = json!({
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "ws_CO_3",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        });
        let outcome = r.handle_charge_callback(payload).await.unwrap();
        assert!(matches!(outcome, ChargeCallbackOutcome::Failed(_)));
        assert_eq!(
            store.campaign_total(c.campaign_id).await.unwrap(),
            BigDecimal::from(0)
        );
    }

    #[tokio::test]
    async fn unknown_checkout_id_is_acknowledged_not_fabricated() {
        let store = Arc::new(MemoryContributionStore::new());
        let r = reconciler(store.clone(), false);
        let outcome = r
            .handle_charge_callback(success_charge_callback("ws_CO_missing", 10.0))
            .await
            .unwrap();
        assert!(matches!(outcome, ChargeCallbackOutcome::Unmatched(_)));
    }

    #[tokio::test]
    async fn connectivity_test_is_recognized() {
        let store = Arc::new(MemoryContributionStore::new());
        let r = reconciler(store, false);
        let outcome = r.handle_charge_callback(json!({})).await.unwrap();
        assert!(matches!(outcome, ChargeCallbackOutcome::ConnectivityTest));
    }

    async fn seeded_refund_pending(store: &MemoryContributionStore) -> Contribution {
        let c = seeded_pending(store, "ws_CO_r", 300).await;
        store
            .mark_completed(
                c.id,
                &crate::database::store::ChargeSettlement {
                    receipt: Some("NLJ7RT61SV".to_string()),
                    phone_number: None,
                    settled_at: None,
                    result_code: 0,
                    result_desc: "ok".to_string(),
                },
            )
            .await
            .unwrap();
        store.begin_refund(c.id, "operator request").await.unwrap();
        store
            .record_reversal_initiated(c.id, "8521-4298025-1", "AG_20260825_0001")
            .await
            .unwrap()
    }

    fn reversal_callback(code: i64, conversation_id: Option<&str>) -> JsonValue {
        let mut result = json!({
            "ResultType": 0,
            "ResultCode": code,
            "ResultDesc": "The service request is processed successfully",
            "ResultParameters": {
                "ResultParameter": [
                    {"Key": "Amount", "Value": 300},
                    {"Key": "OriginalTransactionID", "Value": "NLJ7RT61SV"}
                ]
            }
        });
        if let Some(id) = conversation_id {
            result["ConversationID"] = json!(id);
        }
        json!({ "Result": result })
    }

    #[tokio::test]
    async fn reversal_matched_by_conversation_id_refunds_once() {
        let store = Arc::new(MemoryContributionStore::new());
        let r = reconciler(store.clone(), false);
        let c = seeded_refund_pending(&store).await;
        assert_eq!(
            store.campaign_total(c.campaign_id).await.unwrap(),
            BigDecimal::from(300)
        );

        let outcome = r
            .handle_reversal_callback(reversal_callback(21, Some("AG_20260825_0001")))
            .await
            .unwrap();
        assert!(matches!(outcome, ReversalCallbackOutcome::Refunded(_)));
        assert_eq!(
            store.campaign_total(c.campaign_id).await.unwrap(),
            BigDecimal::from(0)
        );

        let dup = r
            .handle_reversal_callback(reversal_callback(21, Some("AG_20260825_0001")))
            .await
            .unwrap();
        assert!(matches!(dup, ReversalCallbackOutcome::Duplicate(_)));
        assert_eq!(
            store.campaign_total(c.campaign_id).await.unwrap(),
            BigDecimal::from(0)
        );
    }

    #[tokio::test]
    async fn reversal_without_identifiers_falls_back_to_recency_match() {
        let store = Arc::new(MemoryContributionStore::new());
        let r = reconciler(store.clone(), false);
        seeded_refund_pending(&store).await;

        let payload = json!({
            "Result": {
                "ResultCode": 0,
                "ResultDesc": "processed"
            }
        });
        let outcome = r.handle_reversal_callback(payload).await.unwrap();
        assert!(matches!(outcome, ReversalCallbackOutcome::Refunded(_)));
    }

    #[tokio::test]
    async fn strict_mode_turns_unmatched_reversals_into_orphans() {
        let store = Arc::new(MemoryContributionStore::new());
        let r = reconciler(store.clone(), true);
        seeded_refund_pending(&store).await;

        let payload = json!({
            "Result": {
                "ResultCode": 0,
                "ResultDesc": "processed"
            }
        });
        let outcome = r.handle_reversal_callback(payload).await.unwrap();
        assert!(matches!(outcome, ReversalCallbackOutcome::Orphan(_)));
    }

    #[tokio::test]
    async fn failed_reversal_marks_refund_failed_without_debit() {
        let store = Arc::new(MemoryContributionStore::new());
        let r = reconciler(store.clone(), false);
        let c = seeded_refund_pending(&store).await;

        let outcome = r
            .handle_reversal_callback(reversal_callback(2001, Some("AG_20260825_0001")))
            .await
            .unwrap();
        assert!(matches!(outcome, ReversalCallbackOutcome::RefundFailed(_)));
        assert_eq!(
            store.campaign_total(c.campaign_id).await.unwrap(),
            BigDecimal::from(300)
        );
    }
}
