//! Types for recording metrics of learning steps.
//!
//! A learning step of the ACER agent returns a [`Record`], a map from metric
//! names to [`RecordValue`]s. Records of several learning steps can be collected
//! in a [`RecordStorage`] and averaged.
//!
//! # Basic Usage
//!
//! ```rust
//! use acer_core::record::{Record, RecordValue};
//!
//! let mut record = Record::empty();
//! record.insert("critic_loss", RecordValue::Scalar(0.25));
//! record.insert("kl_div", RecordValue::Scalar(0.01));
//! assert_eq!(record.get_scalar("critic_loss").unwrap(), 0.25);
//! ```
mod base;
mod storage;

pub use base::{Record, RecordValue};
pub use storage::RecordStorage;
