//! Action-space specific stages of the learning step.
//!
//! [`Discrete`] and [`Continuous`] implement [`ActionSpace`], whose methods are
//! called by the agent in the order they are declared.
mod continuous;
mod discrete;
use super::{BehaviorLogit, CriticOutput, PolicyParams, TrajectoryBatch};
use crate::util::CriticLoss;
use acer_core::error::AcerError;
use anyhow::Result;
pub use continuous::Continuous;
pub use discrete::Discrete;
use tch::Tensor;

/// Evaluates the critic given observations and optional actions.
pub type CriticFn<'a> = dyn Fn(&Tensor, Option<&Tensor>) -> CriticOutput + 'a;

/// Hyperparameters of the return targets.
#[derive(Debug, Clone, Copy)]
pub struct ReturnParams {
    pub gamma: f64,
    pub lambda: f64,
    pub c_clip_ratio: f64,
}

/// Return targets, `[T, B]` each.
pub struct Targets {
    pub q_ret: Tensor,

    /// Q-opc targets, used for continuous action spaces.
    pub q_opc: Option<Tensor>,
}

/// Terms of the actor objective before weighting, `[T, B]` each.
pub struct ActorTerms {
    pub pg: Tensor,
    pub bc: Tensor,
    pub entropy: Tensor,
}

pub(super) fn mismatch(msg: impl Into<String>) -> anyhow::Error {
    AcerError::ConfigMismatch(msg.into()).into()
}

pub(super) fn malformed(msg: impl Into<String>) -> anyhow::Error {
    AcerError::MalformedBatch(msg.into()).into()
}

/// Stages of the learning step that depend on the action space.
pub trait ActionSpace {
    /// Behavior, target and average policy distributions.
    type Dists;

    /// Outputs of the critic.
    type Values;

    /// Importance ratios.
    type Ratios;

    /// Builds the policy distributions from the actor outputs on `obs_plus_1`.
    fn build_distributions(
        &self,
        target: PolicyParams,
        avg: PolicyParams,
        batch: &TrajectoryBatch,
    ) -> Result<Self::Dists>;

    /// Evaluates the critic on `obs_plus_1`.
    fn evaluate_critic(
        &self,
        critic: &CriticFn,
        batch: &TrajectoryBatch,
        dists: &Self::Dists,
    ) -> Result<Self::Values>;

    /// Computes importance ratios of the target policy to the behavior policy.
    fn compute_ratio(&self, dists: &Self::Dists, batch: &TrajectoryBatch) -> Self::Ratios;

    /// Computes return targets by the backward recursion over time.
    fn compute_retrace(
        &self,
        values: &Self::Values,
        ratios: &Self::Ratios,
        batch: &TrajectoryBatch,
        params: &ReturnParams,
    ) -> Targets;

    /// Computes the terms of the actor objective, to be maximized.
    fn actor_terms(
        &self,
        dists: &Self::Dists,
        values: &Self::Values,
        ratios: &Self::Ratios,
        targets: &Targets,
        batch: &TrajectoryBatch,
        c_clip_ratio: f64,
    ) -> ActorTerms;

    /// Statistics of the target policy on which the trust region acts.
    fn policy_stats(&self, dists: &Self::Dists) -> Vec<Tensor>;

    /// Gradient of `KL(average || target)` with respect to [`ActionSpace::policy_stats`].
    fn kl_gradient(&self, dists: &Self::Dists) -> Vec<Tensor>;

    /// `KL(average || target)` at each step, `[T, B]`.
    fn kl_div(&self, dists: &Self::Dists) -> Tensor;

    /// Elementwise critic loss, `[T, B]`.
    #[allow(clippy::too_many_arguments)]
    fn critic_loss(
        &self,
        critic: &CriticFn,
        batch: &TrajectoryBatch,
        dists: &Self::Dists,
        values: &Self::Values,
        ratios: &Self::Ratios,
        targets: &Targets,
        loss: &CriticLoss,
    ) -> Result<Tensor>;

    /// Samples actions for exploration.
    fn sample_action(&self, params: &PolicyParams, noise_ratio: f64) -> Result<Tensor>;

    /// Returns the most probable actions.
    fn greedy_action(&self, params: &PolicyParams) -> Result<Tensor>;

    /// Behavior parameters of the `i`-th element of a batch of policy parameters.
    fn behavior_logit(&self, params: &PolicyParams, i: i64) -> BehaviorLogit {
        match params {
            PolicyParams::Logits(logits) => BehaviorLogit::Discrete(logits.get(i).detach()),
            PolicyParams::Gaussian { mu, sigma } => BehaviorLogit::Continuous {
                mu: mu.get(i).detach(),
                sigma: sigma.get(i).detach(),
            },
        }
    }
}
