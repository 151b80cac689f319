//! Fire-and-forget state-change notifications.
//!
//! Contribution and refund transitions are pushed to the platform's fan-out
//! endpoint so connected clients see progress without polling. Delivery is
//! best-effort: the store is the source of truth and a lost notification is
//! only a delayed UI update.

use crate::database::store::Contribution;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct ContributionEvent<'a> {
    contribution_id: uuid::Uuid,
    campaign_id: uuid::Uuid,
    status: &'a str,
    amount: String,
}

#[derive(Clone)]
pub struct NotificationSink {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl NotificationSink {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    /// No-op sink for tests and endpoint-less deployments.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Publish a state change. Returns immediately; delivery happens on a
    /// spawned task and failures are logged, never propagated.
    pub fn publish(&self, contribution: &Contribution) {
        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => return,
        };
        let payload = match serde_json::to_value(ContributionEvent {
            contribution_id: contribution.id,
            campaign_id: contribution.campaign_id,
            status: contribution.status.as_str(),
            amount: contribution.amount.to_string(),
        }) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode notification payload: {}", e);
                return;
            }
        };

        let client = self.client.clone();
        tokio::spawn(async move {
            match client.post(&endpoint).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(endpoint = %endpoint, "Notification delivered");
                }
                Ok(response) => {
                    warn!(
                        endpoint = %endpoint,
                        status = %response.status(),
                        "Notification endpoint returned an error"
                    );
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, "Notification delivery failed: {}", e);
                }
            }
        });
    }
}
