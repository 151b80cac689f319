//! Service layer: the money-moving logic behind the HTTP handlers.

pub mod contributions;
pub mod notification;
pub mod reconciler;
pub mod refunds;

pub use contributions::{ContributionError, ContributionRequest, ContributionService};
pub use notification::NotificationSink;
pub use reconciler::{CallbackReconciler, ChargeCallbackOutcome, ReversalCallbackOutcome};
pub use refunds::{RefundError, RefundService};
