#![warn(missing_docs)]
//! Backend-agnostic building blocks of the ACER learner.
//!
//! * [`error`] - errors raised by a learning step.
//! * [`record`] - metrics returned by a learning step.
//! * [`ExperienceBufferBase`] and [`ReplayBufferBase`] - the interface of the buffers
//!   that feed trajectory sequences to the learner.
pub mod error;
pub mod record;

mod base;
pub use base::{ExperienceBufferBase, ReplayBufferBase};
