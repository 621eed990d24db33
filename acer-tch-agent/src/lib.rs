//! ACER agent implemented with [tch](https://crates.io/crates/tch).
//!
//! The crate provides the learning step of ACER (actor-critic with experience
//! replay) for discrete and continuous action spaces, together with the
//! building blocks it needs: optimizers with exportable state, model traits,
//! multilayer perceptrons and a replay buffer of transition sequences.
pub mod acer;
pub mod mlp;
pub mod model;
pub mod opt;
pub mod replay_buffer;
pub mod util;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Copy, Deserialize, Serialize, PartialEq)]
/// Device for using tch.
///
/// This enum is added because [`tch::Device`] does not support serialization.
pub enum Device {
    /// The main CPU device.
    Cpu,

    /// The main GPU device.
    Cuda(usize),
}

impl From<tch::Device> for Device {
    fn from(device: tch::Device) -> Self {
        match device {
            tch::Device::Cpu => Self::Cpu,
            tch::Device::Cuda(n) => Self::Cuda(n),
            _ => unimplemented!(),
        }
    }
}

impl From<Device> for tch::Device {
    fn from(device: Device) -> Self {
        match device {
            Device::Cpu => tch::Device::Cpu,
            Device::Cuda(n) => tch::Device::Cuda(n),
        }
    }
}
