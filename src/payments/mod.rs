//! Payment gateway integration.

pub mod auth;
pub mod error;
pub mod gateway;
pub mod http;
pub mod mpesa;
pub mod phone;
pub mod types;

pub use error::{GatewayError, GatewayResult};
pub use gateway::PaymentGateway;
pub use mpesa::MpesaGateway;
