use super::{malformed, mismatch, ActionSpace, ActorTerms, CriticFn, ReturnParams, Targets};
use crate::{
    acer::{
        dist::{categorical_entropy, categorical_kl, softmax, sum_last, EPS},
        retrace::{clipped_trace, not_done, q_retrace},
        trust_region::categorical_kl_grad,
        BehaviorParams, PolicyParams, TrajectoryBatch,
    },
    util::{ensure_finite, CriticLoss},
};
use anyhow::Result;
use tch::{Kind, Tensor};

/// Categorical policies over `n_actions` actions.
#[derive(Debug, Clone, Copy)]
pub struct Discrete {
    n_actions: i64,
}

impl Discrete {
    pub fn new(n_actions: i64) -> Self {
        Self { n_actions }
    }

    fn logits<'a>(&self, params: &'a PolicyParams) -> Result<&'a Tensor> {
        match params {
            PolicyParams::Logits(logits) => {
                if logits.size().last() != Some(&self.n_actions) {
                    return Err(mismatch(format!(
                        "actor outputs {:?} logits for {} actions",
                        logits.size(),
                        self.n_actions
                    )));
                }
                Ok(logits)
            }
            _ => Err(mismatch(
                "actor outputs Gaussian parameters for a discrete action space",
            )),
        }
    }
}

pub struct Dists {
    /// `[T, B, N]`, target policy, the statistics of the trust region.
    pi: Tensor,

    /// `[T + 1, B, N]`, target policy without gradient.
    pi_plus_1: Tensor,

    /// `[T, B, N]`
    behavior_pi: Tensor,

    /// `[T, B, N]`
    avg_pi: Tensor,
}

pub struct Values {
    /// `[T, B, N]`, detached.
    q: Tensor,

    /// `[T, B]`, action values of the realized actions.
    q_a: Tensor,

    /// `[T + 1, B]`, detached.
    v: Tensor,
}

pub struct Ratios {
    /// `[T, B, N]`
    ratio: Tensor,

    /// `[T, B]`, ratios of the realized actions.
    ratio_a: Tensor,
}

fn gather_action(x: &Tensor, action: &Tensor) -> Tensor {
    x.gather(-1, &action.unsqueeze(-1), false).squeeze_dim(-1)
}

impl ActionSpace for Discrete {
    type Dists = Dists;
    type Values = Values;
    type Ratios = Ratios;

    fn build_distributions(
        &self,
        target: PolicyParams,
        avg: PolicyParams,
        batch: &TrajectoryBatch,
    ) -> Result<Dists> {
        let t_len = batch.unroll_len();
        let pi_plus_1 = softmax(self.logits(&target)?);
        let avg_pi = softmax(self.logits(&avg)?).narrow(0, 0, t_len).detach();
        let behavior_pi = match &batch.behavior {
            BehaviorParams::Logits(logits) => softmax(logits),
            _ => return Err(malformed("expected discrete behavior logits")),
        };

        Ok(Dists {
            pi: pi_plus_1.narrow(0, 0, t_len),
            pi_plus_1: pi_plus_1.detach(),
            behavior_pi,
            avg_pi,
        })
    }

    fn evaluate_critic(
        &self,
        critic: &CriticFn,
        batch: &TrajectoryBatch,
        dists: &Dists,
    ) -> Result<Values> {
        let t_len = batch.unroll_len();
        let q_plus_1 = critic(&batch.obs_plus_1, None).q_value;
        if q_plus_1.size() != dists.pi_plus_1.size() {
            return Err(mismatch(format!(
                "critic outputs action values of shape {:?}, expected {:?}",
                q_plus_1.size(),
                dists.pi_plus_1.size()
            )));
        }
        ensure_finite("q_value", &q_plus_1)?;

        let q = q_plus_1.narrow(0, 0, t_len);
        let q_a = gather_action(&q, &batch.action);
        let v = tch::no_grad(|| sum_last(&(&dists.pi_plus_1 * &q_plus_1)));

        Ok(Values {
            q: q.detach(),
            q_a,
            v,
        })
    }

    fn compute_ratio(&self, dists: &Dists, batch: &TrajectoryBatch) -> Ratios {
        tch::no_grad(|| {
            let ratio = dists.pi.detach() / (&dists.behavior_pi + EPS);
            let ratio_a = gather_action(&ratio, &batch.action);
            Ratios { ratio, ratio_a }
        })
    }

    fn compute_retrace(
        &self,
        values: &Values,
        ratios: &Ratios,
        batch: &TrajectoryBatch,
        params: &ReturnParams,
    ) -> Targets {
        tch::no_grad(|| {
            let trace = clipped_trace(&ratios.ratio_a, params.lambda, params.c_clip_ratio);
            let q_ret = q_retrace(
                &values.q_a.detach(),
                &values.v,
                &batch.reward,
                &not_done(&batch.done),
                &trace,
                params.gamma,
            );
            Targets {
                q_ret: q_ret.narrow(0, 0, batch.unroll_len()),
                q_opc: None,
            }
        })
    }

    fn actor_terms(
        &self,
        dists: &Dists,
        values: &Values,
        ratios: &Ratios,
        targets: &Targets,
        batch: &TrajectoryBatch,
        c_clip_ratio: f64,
    ) -> ActorTerms {
        let v = values.v.narrow(0, 0, batch.unroll_len());
        let log_pi = (&dists.pi + EPS).log();

        let pg = ratios.ratio_a.clamp_max(c_clip_ratio)
            * (&targets.q_ret - &v)
            * gather_action(&log_pi, &batch.action);

        // Bias correction over all actions, weighted by the target policy
        let coeff = (1.0f64 - c_clip_ratio * (&ratios.ratio + EPS).reciprocal()).relu();
        let adv = &values.q - v.unsqueeze(-1);
        let bc = sum_last(&(coeff * dists.pi.detach() * adv * &log_pi));

        ActorTerms {
            pg,
            bc,
            entropy: categorical_entropy(&dists.pi),
        }
    }

    fn policy_stats(&self, dists: &Dists) -> Vec<Tensor> {
        vec![dists.pi.shallow_clone()]
    }

    fn kl_gradient(&self, dists: &Dists) -> Vec<Tensor> {
        vec![categorical_kl_grad(&dists.avg_pi, &dists.pi.detach())]
    }

    fn kl_div(&self, dists: &Dists) -> Tensor {
        tch::no_grad(|| categorical_kl(&dists.avg_pi, &dists.pi.detach()))
    }

    fn critic_loss(
        &self,
        _critic: &CriticFn,
        _batch: &TrajectoryBatch,
        _dists: &Dists,
        values: &Values,
        _ratios: &Ratios,
        targets: &Targets,
        loss: &CriticLoss,
    ) -> Result<Tensor> {
        Ok(loss.elementwise(&values.q_a, &targets.q_ret))
    }

    fn sample_action(&self, params: &PolicyParams, _noise_ratio: f64) -> Result<Tensor> {
        let logits = self.logits(params)?;
        Ok(tch::no_grad(|| softmax(logits).multinomial(1, true).squeeze_dim(-1)))
    }

    fn greedy_action(&self, params: &PolicyParams) -> Result<Tensor> {
        let logits = self.logits(params)?;
        Ok(logits.argmax(-1, false).to_kind(Kind::Int64))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::TryFrom;
    use crate::acer::{retrace::validity_mask, CriticOutput};

    const T: i64 = 4;
    const B: i64 = 2;
    const N: i64 = 3;

    fn batch(logits: &Tensor) -> TrajectoryBatch {
        TrajectoryBatch {
            obs_plus_1: Tensor::randn([T + 1, B, 5], tch::kind::FLOAT_CPU),
            action: Tensor::from_slice(&[0i64, 1, 2, 0, 1, 2, 0, 1]).view([T, B]),
            reward: Tensor::zeros([T, B], tch::kind::FLOAT_CPU),
            done: Tensor::zeros([T, B], tch::kind::FLOAT_CPU),
            weight: None,
            behavior: BehaviorParams::Logits(logits.narrow(0, 0, T).detach()),
        }
    }

    #[test]
    fn test_on_policy_targets() {
        // Behavior equals target, zero rewards and dones, state-independent action values
        let space = Discrete::new(N);
        let logits = Tensor::randn([T + 1, B, N], tch::kind::FLOAT_CPU).set_requires_grad(true);
        let batch = batch(&logits);
        let q_values = Tensor::from_slice(&[1f32, 2.0, 3.0]);
        let critic = |obs: &Tensor, _: Option<&Tensor>| CriticOutput {
            q_value: q_values.expand([obs.size()[0], obs.size()[1], N], false),
            v_value: None,
        };

        let dists = space
            .build_distributions(
                PolicyParams::Logits(logits.shallow_clone()),
                PolicyParams::Logits(logits.detach()),
                &batch,
            )
            .unwrap();
        let values = space.evaluate_critic(&critic, &batch, &dists).unwrap();
        let ratios = space.compute_ratio(&dists, &batch);
        let params = ReturnParams {
            gamma: 1.0,
            lambda: 1.0,
            c_clip_ratio: 10.0,
        };
        let targets = space.compute_retrace(&values, &ratios, &batch, &params);
        assert_eq!(targets.q_ret.size(), vec![T, B]);

        let ratio_a = Vec::<f32>::try_from(&ratios.ratio_a.flatten(0, -1)).unwrap();
        for r in ratio_a {
            assert!((r - 1.0).abs() < 1e-4);
        }

        let kl = space.kl_div(&dists);
        assert!(kl.abs().max().double_value(&[]) < 1e-5);
        let k = space.kl_gradient(&dists);
        assert!(k[0].abs().max().double_value(&[]) < 1e-4);

        let terms = space.actor_terms(&dists, &values, &ratios, &targets, &batch, 10.0);
        assert_eq!(terms.pg.size(), vec![T, B]);
        assert_eq!(terms.bc.size(), vec![T, B]);
        assert_eq!(terms.entropy.size(), vec![T, B]);

        // ratio = 1 < c, so the bias correction vanishes
        assert!(terms.bc.abs().max().double_value(&[]) < 1e-6);

        let mask = validity_mask(&batch.done);
        assert_eq!(mask.sum(Kind::Float).double_value(&[]), (T * B) as f64);
    }

    #[test]
    fn test_constant_critic_targets_state_values() {
        // With equal action values everywhere, Q(s, a) = V(s) and the return stays at V
        let space = Discrete::new(N);
        let logits = Tensor::randn([T + 1, B, N], tch::kind::FLOAT_CPU).set_requires_grad(true);
        let batch = batch(&logits);
        let critic = |obs: &Tensor, _: Option<&Tensor>| CriticOutput {
            q_value: Tensor::full([obs.size()[0], obs.size()[1], N], 2.0, tch::kind::FLOAT_CPU),
            v_value: None,
        };

        let dists = space
            .build_distributions(
                PolicyParams::Logits(logits.shallow_clone()),
                PolicyParams::Logits(logits.detach()),
                &batch,
            )
            .unwrap();
        let values = space.evaluate_critic(&critic, &batch, &dists).unwrap();
        let ratios = space.compute_ratio(&dists, &batch);
        let params = ReturnParams {
            gamma: 1.0,
            lambda: 1.0,
            c_clip_ratio: 10.0,
        };
        let targets = space.compute_retrace(&values, &ratios, &batch, &params);

        let v = values.v.narrow(0, 0, T);
        assert!((&targets.q_ret - &v).abs().max().double_value(&[]) < 1e-5);
        assert!((&targets.q_ret - 2.0).abs().max().double_value(&[]) < 1e-5);

        let terms = space.actor_terms(&dists, &values, &ratios, &targets, &batch, 10.0);
        assert!(terms.pg.abs().max().double_value(&[]) < 1e-5);
        assert!(terms.bc.abs().max().double_value(&[]) < 1e-5);
    }

    #[test]
    fn test_gaussian_actor_is_rejected() {
        let space = Discrete::new(N);
        let logits = Tensor::randn([T + 1, B, N], tch::kind::FLOAT_CPU);
        let batch = batch(&logits);
        let params = PolicyParams::Gaussian {
            mu: logits.shallow_clone(),
            sigma: logits.ones_like(),
        };
        let result = space.build_distributions(params, PolicyParams::Logits(logits), &batch);

        match result {
            Err(e) => assert!(matches!(
                e.downcast_ref::<acer_core::error::AcerError>(),
                Some(acer_core::error::AcerError::ConfigMismatch(_))
            )),
            Ok(_) => panic!("Gaussian actor was accepted"),
        }
    }
}
