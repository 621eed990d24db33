//! Optimizers.
//!
//! The optimizers keep their moment estimates as plain tensors so that the
//! whole optimizer state can be exported, restored and saved together with the
//! networks.
use crate::util::{all_finite, NamedTensors};
use anyhow::{anyhow, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tch::{nn::VarStore, Kind, Tensor};

const EXP_AVG: &str = "exp_avg";
const EXP_AVG_SQ: &str = "exp_avg_sq";
const MAX_EXP_AVG_SQ: &str = "max_exp_avg_sq";
const STEP: &str = "step";
const LR: &str = "lr";

/// Configures an optimizer for training neural networks in an RL agent.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum OptimizerConfig {
    /// Adam optimizer.
    Adam {
        /// Learning rate.
        lr: f64,
    },

    /// Adam optimizer with decoupled weight decay.
    AdamW {
        lr: f64,
        beta1: f64,
        beta2: f64,
        wd: f64,
        eps: f64,
        amsgrad: bool,
    },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::AdamW {
            lr: 5e-4,
            beta1: 0.9,
            beta2: 0.999,
            wd: 1e-5,
            eps: 1e-8,
            amsgrad: false,
        }
    }
}

/// Gradient clipping applied before each optimization step.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum GradClip {
    /// Clamps each element of the gradients into `[-v, v]`.
    Value(f64),

    /// Rescales the gradients so that their global L2 norm does not exceed the value.
    Norm(f64),
}

impl OptimizerConfig {
    /// Constructs an optimizer over the variables of `vs`.
    pub fn build(&self, vs: &VarStore) -> Result<Optimizer> {
        let (lr, beta1, beta2, wd, eps, amsgrad) = match self {
            Self::Adam { lr } => (*lr, 0.9, 0.999, 0.0, 1e-8, false),
            Self::AdamW {
                lr,
                beta1,
                beta2,
                wd,
                eps,
                amsgrad,
            } => (*lr, *beta1, *beta2, *wd, *eps, *amsgrad),
        };
        if lr < 0.0 {
            return Err(anyhow!("Negative learning rate: {}", lr));
        }

        let mut params: Vec<_> = vs.variables().into_iter().collect();
        params.sort_by(|a, b| a.0.cmp(&b.0));
        let zeros = |params: &[(String, Tensor)]| -> Vec<Tensor> {
            params.iter().map(|(_, p)| p.zeros_like()).collect()
        };

        Ok(Optimizer {
            exp_avg: zeros(&params),
            exp_avg_sq: zeros(&params),
            max_exp_avg_sq: zeros(&params),
            params,
            lr,
            beta1,
            beta2,
            wd,
            eps,
            amsgrad,
            grad_clip: None,
            step: 0,
        })
    }

    /// Returns the learning rate.
    pub fn lr(&self) -> f64 {
        match self {
            Self::Adam { lr } => *lr,
            Self::AdamW { lr, .. } => *lr,
        }
    }
}

/// Exported state of an [`Optimizer`].
#[derive(Clone)]
pub struct OptimizerState {
    /// The number of optimization steps taken so far.
    pub step: i64,

    /// Learning rate.
    pub lr: f64,

    /// Moment estimates keyed by `<moment>/<variable name>`.
    pub moments: NamedTensors,
}

/// Adam(W) optimizer with exportable state.
pub struct Optimizer {
    params: Vec<(String, Tensor)>,
    exp_avg: Vec<Tensor>,
    exp_avg_sq: Vec<Tensor>,
    max_exp_avg_sq: Vec<Tensor>,
    lr: f64,
    beta1: f64,
    beta2: f64,
    wd: f64,
    eps: f64,
    amsgrad: bool,
    grad_clip: Option<GradClip>,
    step: i64,
}

impl Optimizer {
    /// Sets gradient clipping.
    pub fn grad_clip(mut self, grad_clip: Option<GradClip>) -> Self {
        self.grad_clip = grad_clip;
        self
    }

    /// Returns the current learning rate.
    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Zeroes the gradients of the parameters.
    pub fn zero_grad(&mut self) {
        for (_, p) in self.params.iter_mut() {
            p.zero_grad();
        }
    }

    /// Returns `true` if all defined gradients are finite.
    pub fn grads_finite(&self) -> bool {
        self.params.iter().all(|(_, p)| {
            let g = p.grad();
            !g.defined() || all_finite(&g)
        })
    }

    fn clip_grad(&mut self) {
        let grads: Vec<Tensor> = self
            .params
            .iter()
            .map(|(_, p)| p.grad())
            .filter(|g| g.defined())
            .collect();

        tch::no_grad(|| match &self.grad_clip {
            None => {}
            Some(GradClip::Value(v)) => {
                for mut g in grads {
                    let _ = g.clamp_(-v, *v);
                }
            }
            Some(GradClip::Norm(max_norm)) => {
                let total_norm = grads
                    .iter()
                    .map(|g| g.pow_tensor_scalar(2).sum(Kind::Double).double_value(&[]))
                    .sum::<f64>()
                    .sqrt();
                if total_norm > *max_norm {
                    let scale = max_norm / (total_norm + 1e-6);
                    for mut g in grads {
                        let _ = g.copy_(&(scale * &g));
                    }
                }
            }
        });
    }

    /// Applies an optimization step with the gradients accumulated in the parameters.
    pub fn step(&mut self) {
        self.clip_grad();
        self.step += 1;

        let t = self.step as i32;
        let bias_correction1 = 1.0 - self.beta1.powi(t);
        let bias_correction2 = 1.0 - self.beta2.powi(t);
        let (lr, beta1, beta2, wd, eps) = (self.lr, self.beta1, self.beta2, self.wd, self.eps);

        tch::no_grad(|| {
            for (i, (_, p)) in self.params.iter_mut().enumerate() {
                let grad = p.grad();
                if !grad.defined() {
                    continue;
                }
                if wd > 0.0 {
                    let decayed = (1.0 - lr * wd) * &*p;
                    p.copy_(&decayed);
                }

                let m = beta1 * &self.exp_avg[i] + (1.0 - beta1) * &grad;
                let v = beta2 * &self.exp_avg_sq[i] + (1.0 - beta2) * grad.square();
                self.exp_avg[i].copy_(&m);
                self.exp_avg_sq[i].copy_(&v);

                let v = if self.amsgrad {
                    let v_max = self.max_exp_avg_sq[i].maximum(&v);
                    self.max_exp_avg_sq[i].copy_(&v_max);
                    v_max
                } else {
                    v
                };
                let denom = (v / bias_correction2).sqrt() + eps;
                let updated = &*p - (lr / bias_correction1) * (m / denom);
                p.copy_(&updated);
            }
        });
    }

    /// Exports the state of the optimizer.
    pub fn state_dict(&self) -> OptimizerState {
        let moments = self
            .params
            .iter()
            .enumerate()
            .flat_map(|(i, (name, _))| {
                vec![
                    (format!("{}/{}", EXP_AVG, name), self.exp_avg[i].copy()),
                    (format!("{}/{}", EXP_AVG_SQ, name), self.exp_avg_sq[i].copy()),
                    (
                        format!("{}/{}", MAX_EXP_AVG_SQ, name),
                        self.max_exp_avg_sq[i].copy(),
                    ),
                ]
            })
            .collect();

        OptimizerState {
            step: self.step,
            lr: self.lr,
            moments,
        }
    }

    /// Restores the state of the optimizer.
    pub fn load_state_dict(&mut self, state: &OptimizerState) -> Result<()> {
        let get = |moment: &str, name: &str| -> Result<&Tensor> {
            state
                .moments
                .get(&format!("{}/{}", moment, name))
                .ok_or_else(|| anyhow!("{} of {} is not in the optimizer state", moment, name))
        };

        tch::no_grad(|| {
            for (i, (name, _)) in self.params.iter().enumerate() {
                self.exp_avg[i].copy_(get(EXP_AVG, name)?);
                self.exp_avg_sq[i].copy_(get(EXP_AVG_SQ, name)?);
                self.max_exp_avg_sq[i].copy_(get(MAX_EXP_AVG_SQ, name)?);
            }
            Ok::<(), anyhow::Error>(())
        })?;
        self.step = state.step;
        self.lr = state.lr;
        Ok(())
    }

    /// Saves the state of the optimizer.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let state = self.state_dict();
        let mut named = state.moments.named_tensors;
        named.insert(STEP.to_string(), Tensor::from(state.step));
        named.insert(LR.to_string(), Tensor::from(state.lr));
        NamedTensors {
            named_tensors: named,
        }
        .save(&path)?;
        info!("Save optimizer state to {:?}", path.as_ref());
        Ok(())
    }

    /// Loads the state of the optimizer.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        let mut named = NamedTensors::load(&path)?.named_tensors;
        let step = named
            .remove(STEP)
            .ok_or_else(|| anyhow!("Step count is not in {:?}", path.as_ref()))?;
        let lr = named
            .remove(LR)
            .ok_or_else(|| anyhow!("Learning rate is not in {:?}", path.as_ref()))?;
        let state = OptimizerState {
            step: step.int64_value(&[]),
            lr: lr.double_value(&[]),
            moments: NamedTensors {
                named_tensors: named,
            },
        };
        self.load_state_dict(&state)?;
        info!("Load optimizer state from {:?}", path.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::TryFrom;
    use tch::{nn, Device};
    use tempdir::TempDir;

    fn var_store(init: f64) -> nn::VarStore {
        let vs = nn::VarStore::new(Device::Cpu);
        let _ = vs.root().var("w", &[2], nn::Init::Const(init));
        vs
    }

    fn quadratic_step(vs: &nn::VarStore, opt: &mut Optimizer) {
        let w = &vs.variables()["w"];
        let loss = (w * w).sum(Kind::Float);
        opt.zero_grad();
        loss.backward();
        opt.step();
    }

    #[test]
    fn test_adam_moves_against_gradient() {
        let vs = var_store(1.0);
        let mut opt = OptimizerConfig::Adam { lr: 0.1 }.build(&vs).unwrap();
        quadratic_step(&vs, &mut opt);

        // First Adam step moves each element by lr regardless of the gradient scale.
        let w = Vec::<f32>::try_from(&vs.variables()["w"]).unwrap();
        for x in w {
            assert!((x - 0.9).abs() < 1e-5);
        }
        assert_eq!(opt.state_dict().step, 1);
    }

    #[test]
    fn test_grad_clip_value() {
        let vs = var_store(3.0);
        let mut opt = OptimizerConfig::Adam { lr: 0.1 }
            .build(&vs)
            .unwrap()
            .grad_clip(Some(GradClip::Value(0.5)));
        let w = &vs.variables()["w"];
        let loss = (w * w).sum(Kind::Float);
        opt.zero_grad();
        loss.backward();
        opt.clip_grad();

        let g = Vec::<f32>::try_from(&w.grad()).unwrap();
        assert_eq!(g, vec![0.5, 0.5]);
    }

    #[test]
    fn test_state_round_trip() {
        let vs1 = var_store(1.0);
        let mut opt1 = OptimizerConfig::default().build(&vs1).unwrap();
        quadratic_step(&vs1, &mut opt1);

        let mut vs2 = var_store(0.0);
        vs2.copy(&vs1).unwrap();
        let mut opt2 = OptimizerConfig::default().build(&vs2).unwrap();
        opt2.load_state_dict(&opt1.state_dict()).unwrap();

        quadratic_step(&vs1, &mut opt1);
        quadratic_step(&vs2, &mut opt2);

        let w1 = Vec::<f32>::try_from(&vs1.variables()["w"]).unwrap();
        let w2 = Vec::<f32>::try_from(&vs2.variables()["w"]).unwrap();
        assert_eq!(w1, w2);
        assert_eq!(opt2.state_dict().step, 2);
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let vs = var_store(1.0);
        let mut opt = OptimizerConfig::default().build(&vs)?;
        quadratic_step(&vs, &mut opt);

        let dir = TempDir::new("opt")?;
        let path = dir.path().join("opt.pt.tch");
        opt.save(&path)?;

        let mut opt_ = OptimizerConfig::default().build(&vs)?;
        opt_.load(&path)?;
        assert_eq!(opt_.state_dict().step, 1);
        assert_eq!(opt_.lr(), opt.lr());
        Ok(())
    }
}
