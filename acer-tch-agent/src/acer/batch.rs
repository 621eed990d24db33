//! Transitions and time-major trajectory batches.
use super::ActionSpaceKind;
use acer_core::error::AcerError;
use anyhow::Result;
use tch::{Kind, Tensor};

/// Parameters of the behavior policy recorded with a transition.
pub enum BehaviorLogit {
    /// Logits of a categorical distribution, shape `[N]`.
    Discrete(Tensor),

    /// Mean and standard deviation of a diagonal Gaussian, each of shape `[N]`.
    Continuous { mu: Tensor, sigma: Tensor },
}

impl Clone for BehaviorLogit {
    fn clone(&self) -> Self {
        match self {
            Self::Discrete(logit) => Self::Discrete(logit.shallow_clone()),
            Self::Continuous { mu, sigma } => Self::Continuous {
                mu: mu.shallow_clone(),
                sigma: sigma.shallow_clone(),
            },
        }
    }
}

/// A single environment transition collected by the behavior policy.
pub struct Transition {
    pub obs: Tensor,
    pub next_obs: Tensor,
    pub logit: BehaviorLogit,

    /// Scalar `int64` index for discrete actions, `[N]` float vector for continuous actions.
    pub action: Tensor,
    pub reward: f32,
    pub done: bool,

    /// Importance weight given by a prioritized replay buffer.
    pub weight: Option<f32>,
}

impl Clone for Transition {
    fn clone(&self) -> Self {
        Self {
            obs: self.obs.shallow_clone(),
            next_obs: self.next_obs.shallow_clone(),
            logit: self.logit.clone(),
            action: self.action.shallow_clone(),
            reward: self.reward,
            done: self.done,
            weight: self.weight,
        }
    }
}

/// Behavior policy parameters of a batch.
pub enum BehaviorParams {
    /// `[T, B, N]`
    Logits(Tensor),

    /// `([T, B, N], [T, B, N])`
    Gaussian { mu: Tensor, sigma: Tensor },
}

/// Time-major tensors made of `B` sequences of `T` transitions.
pub struct TrajectoryBatch {
    /// `[T + 1, B, *]`, the observations extended with the successor of the last transition.
    pub obs_plus_1: Tensor,

    /// `[T, B]` (`int64`) or `[T, B, N]`.
    pub action: Tensor,

    /// `[T, B]`
    pub reward: Tensor,

    /// `[T, B]`, `1.0` for terminal transitions.
    pub done: Tensor,

    /// `[T, B]`
    pub weight: Option<Tensor>,

    pub behavior: BehaviorParams,
}

fn malformed(msg: impl Into<String>) -> anyhow::Error {
    AcerError::MalformedBatch(msg.into()).into()
}

fn select<'a>(
    steps: &[Vec<&'a Transition>],
    f: impl Fn(&'a Transition) -> &'a Tensor,
) -> Vec<Vec<&'a Tensor>> {
    steps
        .iter()
        .map(|row| row.iter().map(|tr| f(tr)).collect())
        .collect()
}

/// Stacks `[T][B]` tensors into a `[T, B, *]` tensor after checking their shapes.
fn stack_time_major(name: &str, xs: Vec<Vec<&Tensor>>) -> Result<Tensor> {
    let shape = xs[0][0].size();
    let rows = xs
        .into_iter()
        .map(|row| {
            if let Some(x) = row.iter().find(|x| x.size() != shape) {
                return Err(malformed(format!(
                    "{} has shape {:?}, expected {:?}",
                    name,
                    x.size(),
                    shape
                )));
            }
            Ok(Tensor::stack(&row, 0))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::stack(&rows, 0))
}

impl TrajectoryBatch {
    /// Reshapes `B` sequences of transitions into time-major tensors.
    ///
    /// Fails with [`AcerError::MalformedBatch`] when the batch is empty, when a
    /// sequence length differs from `unroll_len`, when shapes disagree across
    /// transitions, when behavior parameters do not match `kind`, or when
    /// importance weights are given for only a part of the transitions.
    pub fn from_sequences(
        seqs: &[Vec<Transition>],
        unroll_len: usize,
        kind: &ActionSpaceKind,
    ) -> Result<Self> {
        if seqs.is_empty() || unroll_len == 0 {
            return Err(malformed("empty batch"));
        }
        if let Some(seq) = seqs.iter().find(|seq| seq.len() != unroll_len) {
            return Err(malformed(format!(
                "sequence of length {} where unroll length is {}",
                seq.len(),
                unroll_len
            )));
        }

        // Transpose to [T][B]
        let steps: Vec<Vec<&Transition>> = (0..unroll_len)
            .map(|t| seqs.iter().map(|seq| &seq[t]).collect())
            .collect();

        let obs = stack_time_major("obs", select(&steps, |tr| &tr.obs))?;
        let last_next_obs: Vec<&Tensor> = seqs
            .iter()
            .map(|seq| &seq[unroll_len - 1].next_obs)
            .collect();
        let next_obs = stack_time_major("next_obs", vec![last_next_obs])?;
        if next_obs.size()[2..] != obs.size()[2..] {
            return Err(malformed("next_obs and obs have different shapes"));
        }
        let obs_plus_1 = Tensor::cat(&[obs, next_obs], 0);

        let (action, behavior) = match kind {
            ActionSpaceKind::Discrete { n_actions } => {
                let logits = steps
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|tr| match &tr.logit {
                                BehaviorLogit::Discrete(logit) => Ok(logit),
                                _ => Err(malformed("expected discrete behavior logits")),
                            })
                            .collect::<Result<Vec<_>>>()
                    })
                    .collect::<Result<Vec<_>>>()?;
                let logits = stack_time_major("logit", logits)?.to_kind(Kind::Float);
                if logits.size()[2..] != [*n_actions] {
                    return Err(malformed(format!(
                        "logits of shape {:?} for {} actions",
                        &logits.size()[2..],
                        n_actions
                    )));
                }
                let action = stack_time_major("action", select(&steps, |tr| &tr.action))?;
                if action.numel() != unroll_len * seqs.len() {
                    return Err(malformed("discrete actions must be scalars"));
                }
                let action = action
                    .view([unroll_len as i64, seqs.len() as i64])
                    .to_kind(Kind::Int64);
                let (min, max) = (action.min().int64_value(&[]), action.max().int64_value(&[]));
                if min < 0 || max >= *n_actions {
                    return Err(malformed(format!(
                        "action index out of range [0, {}): min {}, max {}",
                        n_actions, min, max
                    )));
                }
                (action, BehaviorParams::Logits(logits))
            }
            ActionSpaceKind::Continuous { action_dim } => {
                let params = steps
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|tr| match &tr.logit {
                                BehaviorLogit::Continuous { mu, sigma } => Ok((mu, sigma)),
                                _ => Err(malformed("expected Gaussian behavior parameters")),
                            })
                            .collect::<Result<Vec<_>>>()
                    })
                    .collect::<Result<Vec<_>>>()?;
                let mu = params.iter().map(|row| row.iter().map(|p| p.0).collect()).collect();
                let sigma = params.iter().map(|row| row.iter().map(|p| p.1).collect()).collect();
                let mu = stack_time_major("logit_mu", mu)?.to_kind(Kind::Float);
                let sigma = stack_time_major("logit_sigma", sigma)?.to_kind(Kind::Float);
                let action = stack_time_major("action", select(&steps, |tr| &tr.action))?
                    .to_kind(Kind::Float);
                for (name, x) in [("logit_mu", &mu), ("logit_sigma", &sigma), ("action", &action)] {
                    if x.size()[2..] != [*action_dim] {
                        return Err(malformed(format!(
                            "{} of shape {:?} for action dimension {}",
                            name,
                            &x.size()[2..],
                            action_dim
                        )));
                    }
                }
                (action, BehaviorParams::Gaussian { mu, sigma })
            }
        };

        let reward: Vec<f32> = steps.iter().flatten().map(|tr| tr.reward).collect();
        let done: Vec<f32> = steps
            .iter()
            .flatten()
            .map(|tr| if tr.done { 1.0 } else { 0.0 })
            .collect();
        let shape = [unroll_len as i64, seqs.len() as i64];
        let reward = Tensor::from_slice(&reward).view(shape);
        let done = Tensor::from_slice(&done).view(shape);

        let weights: Vec<f32> = steps.iter().flatten().filter_map(|tr| tr.weight).collect();
        let weight = if weights.is_empty() {
            None
        } else if weights.len() == unroll_len * seqs.len() {
            Some(Tensor::from_slice(&weights).view(shape))
        } else {
            return Err(malformed("importance weights are given for a part of the batch"));
        };

        Ok(Self {
            obs_plus_1,
            action,
            reward,
            done,
            weight,
            behavior,
        })
    }

    /// Returns the unroll length `T`.
    pub fn unroll_len(&self) -> i64 {
        self.reward.size()[0]
    }

    /// Returns the batch size `B`.
    pub fn batch_size(&self) -> i64 {
        self.reward.size()[1]
    }

    /// Moves the tensors to the device.
    pub fn to(self, device: tch::Device) -> Self {
        let behavior = match self.behavior {
            BehaviorParams::Logits(logits) => BehaviorParams::Logits(logits.to(device)),
            BehaviorParams::Gaussian { mu, sigma } => BehaviorParams::Gaussian {
                mu: mu.to(device),
                sigma: sigma.to(device),
            },
        };
        Self {
            obs_plus_1: self.obs_plus_1.to(device),
            action: self.action.to(device),
            reward: self.reward.to(device),
            done: self.done.to(device),
            weight: self.weight.map(|w| w.to(device)),
            behavior,
        }
    }
}
