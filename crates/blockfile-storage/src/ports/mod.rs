//! # Ports Layer
//!
//! - `inbound.rs` - Driving ports (API exposed to the ledger)
//! - `outbound.rs` - Driven ports (dependencies required by the service)

pub mod inbound;
pub mod outbound;
