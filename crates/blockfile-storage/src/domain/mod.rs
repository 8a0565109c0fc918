//! # Domain Layer
//!
//! Pure domain logic for the blockfile storage engine. No file or journal
//! I/O happens here.
//!
//! ## Modules
//!
//! - `codec` - Record framing and block encoding
//! - `checkpoint` - Writer progress marker and its slot format
//! - `entities` - Locations and index entries
//! - `index` - In-memory committed index
//! - `recovery` - Reconciliation rules and report
//! - `value_objects` - Configuration and key layout
//! - `errors` - Domain error types

pub mod checkpoint;
pub mod codec;
pub mod entities;
pub mod errors;
pub mod index;
pub mod recovery;
pub mod value_objects;
