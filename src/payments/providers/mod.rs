//! Payment provider implementations
//!
//! Concrete implementations of the PaymentProvider trait, one per vendor.

pub mod payfast;
pub mod yoco;

pub use payfast::PayFastProvider;
pub use yoco::YocoProvider;
