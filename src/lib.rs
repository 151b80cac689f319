//! Harambee backend core: M-Pesa contribution intake, callback
//! reconciliation, campaign ledger accounting and admin-driven refunds.

pub mod api;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod payments;
pub mod services;
