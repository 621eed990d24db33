//! Configuration of ACER agent.
use super::{ActorConfig, CriticConfig};
use crate::{
    opt::GradClip,
    util::{CriticLoss, OutDim},
    Device,
};
use anyhow::Result;
use log::info;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Action space of the environment.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum ActionSpaceKind {
    /// `n_actions` discrete actions.
    Discrete { n_actions: i64 },

    /// Real vectors of `action_dim` dimensions.
    Continuous { action_dim: i64 },
}

impl ActionSpaceKind {
    /// The number of actions or the dimension of the action vector.
    pub fn dim(&self) -> i64 {
        match self {
            Self::Discrete { n_actions } => *n_actions,
            Self::Continuous { action_dim } => *action_dim,
        }
    }
}

/// Constructs [`Acer`](super::Acer).
///
/// `P` and `Q` are the configurations of the policy network and the value network.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct AcerConfig<P: OutDim, Q> {
    pub(super) actor_config: ActorConfig<P>,
    pub(super) critic_config: CriticConfig<Q>,
    pub(super) action_space: ActionSpaceKind,
    pub(super) discount_factor: f64,
    pub(super) lambda: f64,
    pub(super) unroll_len: usize,
    pub(super) entropy_weight: f64,
    pub(super) value_weight: f64,
    pub(super) c_clip_ratio: f64,
    pub(super) trust_region: bool,
    pub(super) trust_region_value: f64,
    pub(super) target_theta: f64,
    pub(super) batch_size: usize,
    pub(super) update_per_collect: usize,
    pub(super) priority: bool,
    pub(super) priority_is_weight: bool,
    pub(super) critic_loss: CriticLoss,
    pub(super) grad_clip: Option<GradClip>,
    pub(super) noise_ratio: f64,
    pub(super) seed: Option<i64>,
    pub device: Option<Device>,
}

impl<P: OutDim, Q> Default for AcerConfig<P, Q> {
    fn default() -> Self {
        Self {
            actor_config: Default::default(),
            critic_config: Default::default(),
            action_space: ActionSpaceKind::Discrete { n_actions: 2 },
            discount_factor: 0.9,
            lambda: 1.0,
            unroll_len: 32,
            entropy_weight: 1e-4,
            value_weight: 0.5,
            c_clip_ratio: 10.0,
            trust_region: true,
            trust_region_value: 1.0,
            target_theta: 0.01,
            batch_size: 16,
            update_per_collect: 4,
            priority: false,
            priority_is_weight: false,
            critic_loss: CriticLoss::Mse,
            grad_clip: None,
            noise_ratio: 0.0,
            seed: None,
            device: None,
        }
    }
}

impl<P, Q> AcerConfig<P, Q>
where
    P: DeserializeOwned + Serialize + OutDim,
    Q: DeserializeOwned + Serialize,
{
    /// Configuration of actor.
    pub fn actor_config(mut self, actor_config: ActorConfig<P>) -> Self {
        self.actor_config = actor_config;
        self
    }

    /// Configuration of critic.
    pub fn critic_config(mut self, critic_config: CriticConfig<Q>) -> Self {
        self.critic_config = critic_config;
        self
    }

    /// Action space.
    pub fn action_space(mut self, v: ActionSpaceKind) -> Self {
        self.action_space = v;
        self
    }

    /// Discount factor.
    pub fn discount_factor(mut self, v: f64) -> Self {
        self.discount_factor = v;
        self
    }

    /// Decay of the retrace traces.
    pub fn lambda(mut self, v: f64) -> Self {
        self.lambda = v;
        self
    }

    /// Length of the transition sequences used for training.
    pub fn unroll_len(mut self, v: usize) -> Self {
        self.unroll_len = v;
        self
    }

    /// Weight of the entropy bonus.
    pub fn entropy_weight(mut self, v: f64) -> Self {
        self.entropy_weight = v;
        self
    }

    /// Weight of the critic loss.
    pub fn value_weight(mut self, v: f64) -> Self {
        self.value_weight = v;
        self
    }

    /// Upper bound of importance ratios.
    pub fn c_clip_ratio(mut self, v: f64) -> Self {
        self.c_clip_ratio = v;
        self
    }

    /// Enables or disables the trust region.
    pub fn trust_region(mut self, v: bool) -> Self {
        self.trust_region = v;
        self
    }

    /// Radius of the trust region.
    pub fn trust_region_value(mut self, v: f64) -> Self {
        self.trust_region_value = v;
        self
    }

    /// Momentum of the update of the average policy.
    pub fn target_theta(mut self, v: f64) -> Self {
        self.target_theta = v;
        self
    }

    /// Batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// The number of learning steps per collection.
    pub fn update_per_collect(mut self, v: usize) -> Self {
        self.update_per_collect = v;
        self
    }

    /// Whether the replay buffer is prioritized.
    pub fn priority(mut self, v: bool) -> Self {
        self.priority = v;
        self
    }

    /// Whether the importance weights of a prioritized replay buffer weight the losses.
    pub fn priority_is_weight(mut self, v: bool) -> Self {
        self.priority_is_weight = v;
        self
    }

    /// Critic loss.
    pub fn critic_loss(mut self, v: CriticLoss) -> Self {
        self.critic_loss = v;
        self
    }

    /// Gradient clipping of both optimizers.
    pub fn grad_clip(mut self, v: Option<GradClip>) -> Self {
        self.grad_clip = v;
        self
    }

    /// Scale of the exploration noise added to continuous actions while collecting.
    pub fn noise_ratio(mut self, v: f64) -> Self {
        self.noise_ratio = v;
        self
    }

    /// Random seed.
    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Device.
    pub fn device(mut self, device: tch::Device) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Constructs [`AcerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of ACER agent from {:?}", path_);
        Ok(b)
    }

    /// Saves [`AcerConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of ACER agent into {:?}", path_);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{acer::SdnNetConfig, mlp::MlpConfig, opt::OptimizerConfig};
    use tempdir::TempDir;

    #[test]
    fn test_defaults() {
        let config = AcerConfig::<MlpConfig, MlpConfig>::default();
        assert_eq!(config.discount_factor, 0.9);
        assert_eq!(config.lambda, 1.0);
        assert_eq!(config.unroll_len, 32);
        assert_eq!(config.c_clip_ratio, 10.0);
        assert_eq!(config.trust_region_value, 1.0);
        assert_eq!(config.target_theta, 0.01);
        assert_eq!(
            config.actor_config.opt_config,
            OptimizerConfig::AdamW {
                lr: 5e-4,
                beta1: 0.9,
                beta2: 0.999,
                wd: 1e-5,
                eps: 1e-8,
                amsgrad: false,
            }
        );
    }

    #[test]
    fn test_serde_config() -> Result<()> {
        let config = AcerConfig::<MlpConfig, SdnNetConfig>::default()
            .actor_config(ActorConfig::default().pi_config(MlpConfig::new(3, vec![64], 2, false)))
            .critic_config(CriticConfig::default().q_config(SdnNetConfig::new(3, 2, vec![64])))
            .action_space(ActionSpaceKind::Continuous { action_dim: 2 })
            .grad_clip(Some(GradClip::Norm(10.0)))
            .seed(42)
            .device(tch::Device::Cpu);

        let dir = TempDir::new("acer_config")?;
        let path = dir.path().join("acer_config.yaml");
        config.save(&path)?;
        let config_ = AcerConfig::<MlpConfig, SdnNetConfig>::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }
}
