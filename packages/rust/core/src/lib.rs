//! Core pipeline orchestration for paperpipe.
//!
//! This crate ties discovery, batch inference, the state store and the
//! notification channel together into the three scheduled entry points:
//! `enqueue`, `advance_interest` and `advance_delivery`.

pub mod delivery;
pub mod enqueue;
pub mod interest;
pub mod pipeline;
pub mod prompts;
pub mod responses;

#[cfg(test)]
mod testing;

pub use enqueue::EnqueueOutcome;
pub use pipeline::{AdvanceReport, Pipeline, ProgressReporter, SilentProgress};
pub use prompts::PromptSet;
