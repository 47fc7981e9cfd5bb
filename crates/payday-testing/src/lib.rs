//! Test utilities for Payday services.
//!
//! Provides a Stripe-style webhook signer, event payload builders and the
//! contract fixture loader. Import in tests only; never in production code.

pub mod events;
pub mod fixture;
pub mod webhook;
