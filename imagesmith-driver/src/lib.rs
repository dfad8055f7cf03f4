//! Compute driver contract for the imagesmith image builder.
//!
//! The [`Driver`] trait is the boundary between the build workflow and the
//! platform. [`DriverMock`] records calls and returns programmed results;
//! [`InMemoryDriver`] keeps resources in memory and fails the way the
//! platform would.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod driver;
pub mod error;
pub mod fake;
pub mod mock;
pub mod signal;

pub use config::DriverConfig;
pub use driver::Driver;
pub use error::{DriverError, ResourceKind};
pub use fake::InMemoryDriver;
pub use mock::DriverMock;
pub use signal::{Completion, CompletionSender, PendingValue, SignalId, ValueSender, ValueStream};
