//! Payment gateway integration module
//!
//! A unified interface over South African payment gateways (PayFast, Yoco):
//! standardized request/response types, a provider trait, concrete vendor
//! adapters and the registry/orchestration manager.

pub mod manager;
pub mod providers;
pub mod traits;
pub mod types;
pub mod utils;

pub use manager::PaymentManager;
pub use traits::PaymentProvider;
