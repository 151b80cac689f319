use crate::payments::error::GatewayResult;
use crate::payments::types::{
    ChargeInitiation, ChargeRequest, ChargeStatus, ReversalInitiation, ReversalRequest,
};
use async_trait::async_trait;

/// Outbound payment gateway operations.
///
/// The service depends on this trait rather than a concrete upstream so the
/// reconciliation and refund logic can be exercised against a scripted
/// gateway in tests.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Prompt the payer's phone to authorize a charge.
    ///
    /// Success means the upstream queued the prompt; the final outcome
    /// arrives on the charge callback route.
    async fn initiate_charge(&self, request: &ChargeRequest) -> GatewayResult<ChargeInitiation>;

    /// Ask the upstream to return a settled transaction to the payer.
    ///
    /// Success means the reversal was queued; the final outcome arrives on
    /// the reversal callback route.
    async fn initiate_reversal(
        &self,
        request: &ReversalRequest,
    ) -> GatewayResult<ReversalInitiation>;

    /// Poll the final status of a previously initiated charge. Used when a
    /// callback never arrived.
    async fn query_charge_status(&self, checkout_request_id: &str) -> GatewayResult<ChargeStatus>;
}
