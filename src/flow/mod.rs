//! Flow control infrastructure.
//!
//! Provides:
//! - Permit gate bounding outstanding sends per channel

pub mod permit;
