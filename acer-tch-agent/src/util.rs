//! Utilities.
use crate::model::ModelBase;
use acer_core::error::AcerError;
use anyhow::Result;
use log::trace;
use serde::{Deserialize, Serialize};
use tch::{Reduction, Tensor};
mod named_tensors;
pub use named_tensors::NamedTensors;

/// Critic loss type.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum CriticLoss {
    /// Half of the squared error.
    Mse,

    /// Smooth L1 loss.
    SmoothL1,
}

impl CriticLoss {
    /// Returns the elementwise loss between predictions and targets.
    pub fn elementwise(&self, pred: &Tensor, target: &Tensor) -> Tensor {
        match self {
            Self::Mse => 0.5 * pred.mse_loss(target, Reduction::None),
            Self::SmoothL1 => pred.smooth_l1_loss(target, Reduction::None, 1.0),
        }
    }
}

/// Moves the parameters of `dest` toward those of `src`.
///
/// Variables are identified by their names.
///
/// dest = theta * src + (1.0 - theta) * dest
pub fn track<M: ModelBase>(dest: &mut M, src: &M, theta: f64) {
    let src = src.get_var_store().variables();
    let dest = &mut dest.get_var_store_mut().variables();
    debug_assert_eq!(src.len(), dest.len());

    tch::no_grad(|| {
        for (name, dest) in dest.iter_mut() {
            if let Some(src) = src.get(name) {
                dest.copy_(&(theta * src + (1.0 - theta) * &*dest));
            }
        }
    });
    trace!("momentum update with theta = {}", theta);
}

/// Interface for handling output dimensions.
pub trait OutDim {
    /// Returns the output dimension.
    fn get_out_dim(&self) -> i64;

    /// Sets the  output dimension.
    fn set_out_dim(&mut self, v: i64);
}

/// Returns `true` if all elements of the tensor are finite.
pub fn all_finite(t: &Tensor) -> bool {
    t.isfinite().all().int64_value(&[]) != 0
}

/// Fails with [`AcerError::NumericalInstability`] if the tensor has a non-finite element.
pub fn ensure_finite(name: &str, t: &Tensor) -> Result<()> {
    if all_finite(t) {
        Ok(())
    } else {
        Err(AcerError::NumericalInstability(name.to_string()).into())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::TryFrom;

    #[test]
    fn test_ensure_finite() {
        let t = Tensor::from_slice(&[1f32, 2.0, 3.0]);
        assert!(ensure_finite("t", &t).is_ok());

        let t = Tensor::from_slice(&[1f32, f32::NAN]);
        let err = ensure_finite("logits", &t).unwrap_err();
        assert_eq!(
            err.downcast_ref::<AcerError>(),
            Some(&AcerError::NumericalInstability("logits".to_string()))
        );

        let t = Tensor::from_slice(&[f32::INFINITY]);
        assert!(!all_finite(&t));
    }

    #[test]
    fn test_critic_loss() {
        let pred = Tensor::from_slice(&[0f32, 0.0]);
        let tgt = Tensor::from_slice(&[2f32, 0.5]);

        let mse = Vec::<f32>::try_from(&CriticLoss::Mse.elementwise(&pred, &tgt)).unwrap();
        assert_eq!(mse, vec![2.0, 0.125]);

        let l1 = Vec::<f32>::try_from(&CriticLoss::SmoothL1.elementwise(&pred, &tgt)).unwrap();
        assert_eq!(l1, vec![1.5, 0.125]);
    }
}
