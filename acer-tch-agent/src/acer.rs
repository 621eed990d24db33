//! ACER agent.
//!
//! The learning step is built from the stages in [`retrace`], [`trust_region`]
//! and [`dist`], specialized to discrete or continuous action spaces. [`Acer`]
//! drives them and owns the networks and their optimizers.
mod action_space;
mod actor;
mod base;
mod batch;
mod config;
mod critic;
pub mod dist;
mod net;
pub mod retrace;
mod sample;
pub mod trust_region;
pub use actor::{Actor, ActorConfig, PolicyParams};
pub use base::{Acer, AcerState};
pub use batch::{BehaviorLogit, BehaviorParams, TrajectoryBatch, Transition};
pub use config::{AcerConfig, ActionSpaceKind};
pub use critic::{Critic, CriticConfig, CriticInput, CriticOutput};
pub use net::{QNet, SdnNet, SdnNetConfig};
pub use sample::{get_train_sample, process_transition, PolicyOutput, Timestep};
