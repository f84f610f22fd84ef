//! Storefront payment service
//!
//! Multi-provider payment gateway layer: provider registry, standardized
//! payment lifecycle, webhook verification and the thin HTTP surface the
//! storefront checkout talks to.

pub mod api;
pub mod config;
pub mod error;
pub mod orders;
pub mod payments;
