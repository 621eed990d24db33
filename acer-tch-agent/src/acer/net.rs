//! Value networks for the critic.
use super::{CriticInput, CriticOutput};
use crate::{
    mlp::{Mlp, MlpConfig},
    model::SubModel,
};
use serde::{Deserialize, Serialize};
use tch::{nn, nn::Module, Device, Tensor};

/// Action-value network for discrete action spaces.
///
/// Outputs the action values of all actions.
pub struct QNet {
    mlp: Mlp,
}

impl SubModel for QNet {
    type Config = MlpConfig;
    type Input = CriticInput;
    type Output = CriticOutput;

    fn build(var_store: &nn::VarStore, config: Self::Config) -> Self {
        Self {
            mlp: Mlp::build(var_store, config),
        }
    }

    fn clone_with_var_store(&self, var_store: &nn::VarStore) -> Self {
        Self {
            mlp: self.mlp.clone_with_var_store(var_store),
        }
    }

    fn forward(&self, input: &Self::Input) -> Self::Output {
        CriticOutput {
            q_value: self.mlp.forward(&input.obs),
            v_value: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`SdnNet`].
pub struct SdnNetConfig {
    pub obs_dim: i64,
    pub action_dim: i64,
    pub units: Vec<i64>,
}

impl SdnNetConfig {
    /// Creates configuration of [`SdnNet`].
    pub fn new(obs_dim: i64, action_dim: i64, units: Vec<i64>) -> Self {
        Self {
            obs_dim,
            action_dim,
            units,
        }
    }

    fn feature_dim(&self) -> i64 {
        *self.units.last().unwrap_or(&self.obs_dim)
    }
}

/// Stochastic dueling network for continuous action spaces.
///
/// A shared torso feeds a state-value head and an advantage head that also
/// takes the action. The action value is `q(s, a) = v(s) + adv(s, a)`.
///
/// The advantage is not centred by its mean over actions sampled from the
/// policy, so `v(s)` is only an estimate of `E_pi[q(s, a)]`. The state value
/// comes from its own head and does not depend on the action.
pub struct SdnNet {
    config: SdnNetConfig,
    device: Device,
    torso: nn::Sequential,
    v_head: nn::Linear,
    adv_head: nn::Sequential,
}

impl SdnNet {
    fn create_net(
        var_store: &nn::VarStore,
        config: &SdnNetConfig,
    ) -> (nn::Sequential, nn::Linear, nn::Sequential) {
        let p = &(var_store.root() / "sdn");
        let mut torso = nn::seq();
        let mut in_dim = config.obs_dim;

        for (i, &n) in config.units.iter().enumerate() {
            torso = torso
                .add(nn::linear(p / format!("torso{}", i), in_dim, n, Default::default()))
                .add_fn(|x| x.relu());
            in_dim = n;
        }

        let feature_dim = config.feature_dim();
        let v_head = nn::linear(p / "v", feature_dim, 1, Default::default());
        let adv_head = nn::seq()
            .add(nn::linear(
                p / "adv0",
                feature_dim + config.action_dim,
                feature_dim,
                Default::default(),
            ))
            .add_fn(|x| x.relu())
            .add(nn::linear(p / "adv1", feature_dim, 1, Default::default()));

        (torso, v_head, adv_head)
    }
}

impl SubModel for SdnNet {
    type Config = SdnNetConfig;
    type Input = CriticInput;
    type Output = CriticOutput;

    fn build(var_store: &nn::VarStore, config: Self::Config) -> Self {
        let (torso, v_head, adv_head) = Self::create_net(var_store, &config);

        Self {
            config,
            device: var_store.device(),
            torso,
            v_head,
            adv_head,
        }
    }

    fn clone_with_var_store(&self, var_store: &nn::VarStore) -> Self {
        Self::build(var_store, self.config.clone())
    }

    fn forward(&self, input: &Self::Input) -> Self::Output {
        let feature = self.torso.forward(&input.obs.to(self.device));
        let v = feature.apply(&self.v_head);
        let q = match &input.act {
            Some(act) => {
                let x = Tensor::cat(&[&feature, &act.to(self.device)], -1);
                &v + self.adv_head.forward(&x)
            }
            None => v.shallow_clone(),
        };

        CriticOutput {
            q_value: q,
            v_value: Some(v),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sdn_output_shapes() {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = SdnNet::build(&vs, SdnNetConfig::new(4, 2, vec![16, 16]));
        let out = net.forward(&CriticInput {
            obs: Tensor::randn([5, 3, 4], tch::kind::FLOAT_CPU),
            act: Some(Tensor::randn([5, 3, 2], tch::kind::FLOAT_CPU)),
        });

        assert_eq!(out.q_value.size(), vec![5, 3, 1]);
        assert_eq!(out.v_value.unwrap().size(), vec![5, 3, 1]);
    }

    #[test]
    fn test_sdn_advantage_is_not_centred() {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = SdnNet::build(&vs, SdnNetConfig::new(4, 2, vec![16]));
        let obs = Tensor::randn([5, 3, 4], tch::kind::FLOAT_CPU);
        let act = Tensor::randn([5, 3, 2], tch::kind::FLOAT_CPU);
        let out = net.forward(&CriticInput {
            obs: obs.shallow_clone(),
            act: Some(act.shallow_clone()),
        });
        let v = out.v_value.unwrap();

        // q - v is the raw output of the advantage head
        let feature = net.torso.forward(&obs);
        let adv = net.adv_head.forward(&Tensor::cat(&[&feature, &act], -1));
        assert!((&out.q_value - &v - adv).abs().max().double_value(&[]) < 1e-6);

        // Without an action the state value is returned as is
        let out = net.forward(&CriticInput { obs, act: None });
        assert!(out.q_value.equal(&v));
    }

    #[test]
    fn test_qnet_outputs_all_actions() {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = QNet::build(&vs, MlpConfig::new(4, vec![16], 3, false));
        let out = net.forward(&CriticInput {
            obs: Tensor::randn([5, 3, 4], tch::kind::FLOAT_CPU),
            act: None,
        });

        assert_eq!(out.q_value.size(), vec![5, 3, 3]);
        assert!(out.v_value.is_none());
    }
}
