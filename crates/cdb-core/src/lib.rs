//! Core of the course delivery bot: lesson catalog, enrollment
//! progress, the delivery scheduler, the content sync engine and the
//! assignment review router. Platform adapters live in `cdb-telegram`.

pub mod assignment;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod progress;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod tariff;

#[cfg(test)]
pub(crate) mod testutil;

pub use errors::{Error, Result};
