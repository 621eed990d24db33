//! Interface of neural network models.
mod base;
pub use base::{ModelBase, SubModel};
