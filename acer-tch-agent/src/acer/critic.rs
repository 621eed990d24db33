//! Critic of the ACER agent.
mod base;
mod config;
pub use base::{Critic, CriticInput, CriticOutput};
pub use config::CriticConfig;
