//! Core domain types for webhook fan-out delivery.
//!
//! Provides validated endpoint and payload types, per-attempt and
//! per-payload delivery outcomes, validation errors and the clock abstraction
//! used for every sleep in the delivery pipeline. The delivery engine and the
//! test harness both build on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    AttemptOutcome, AttemptRecord, DeliveryOutcome, DeliveryResult, Endpoint, JobId, Payload,
};
pub use time::{Clock, RealClock, TestClock};
