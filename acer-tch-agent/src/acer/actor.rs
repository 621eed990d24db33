//! Actor of the ACER agent.
mod base;
mod config;
pub use base::{Actor, PolicyParams};
pub use config::ActorConfig;
