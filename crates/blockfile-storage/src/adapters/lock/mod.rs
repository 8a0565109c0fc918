//! # Ledger Directory Locking
//!
//! Keeps a second process from opening the same ledger directory.
//!
//! - `flock`: advisory `LOCK` file held through fs2

mod flock;
#[cfg(test)]
mod tests;

pub use flock::{DatabaseLock, LockError, LOCK_FILE};
