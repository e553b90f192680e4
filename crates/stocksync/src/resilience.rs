//! Error taxonomy, retry decisions and the resilient request wrapper.

mod classifier;
mod client;

pub use classifier::{ErrorClassifier, ErrorContext, ErrorType, RetryPolicy};
pub use client::{CallReport, ResilientClient};
