use super::{malformed, mismatch, ActionSpace, ActorTerms, CriticFn, ReturnParams, Targets};
use crate::{
    acer::{
        dist::{normal_entropy, normal_kl, normal_log_prob, normal_sample, sum_last, EPS},
        retrace::{clipped_trace, not_done, q_opc, q_retrace},
        trust_region::normal_kl_grad,
        BehaviorParams, CriticOutput, PolicyParams, TrajectoryBatch,
    },
    util::{ensure_finite, CriticLoss},
};
use anyhow::Result;
use tch::{Kind, Tensor};

/// Diagonal Gaussian policies over `action_dim` dimensional actions.
#[derive(Debug, Clone, Copy)]
pub struct Continuous {
    action_dim: i64,
}

impl Continuous {
    pub fn new(action_dim: i64) -> Self {
        Self { action_dim }
    }

    fn gaussian<'a>(&self, params: &'a PolicyParams) -> Result<(&'a Tensor, &'a Tensor)> {
        match params {
            PolicyParams::Gaussian { mu, sigma } => {
                if mu.size().last() != Some(&self.action_dim) || mu.size() != sigma.size() {
                    return Err(mismatch(format!(
                        "actor outputs mean {:?} and std {:?} for action dimension {}",
                        mu.size(),
                        sigma.size(),
                        self.action_dim
                    )));
                }
                Ok((mu, sigma))
            }
            _ => Err(mismatch("actor outputs logits for a continuous action space")),
        }
    }
}

/// Splits the critic output into `[*]` action values and `[*]` state values.
fn q_and_v(out: CriticOutput, expected: &[i64]) -> Result<(Tensor, Tensor)> {
    let v = out
        .v_value
        .ok_or_else(|| mismatch("critic does not output state values"))?;
    let q = out.q_value.squeeze_dim(-1);
    let v = v.squeeze_dim(-1);
    if q.size() != expected || v.size() != expected {
        return Err(mismatch(format!(
            "critic outputs values of shape {:?} and {:?}, expected {:?}",
            q.size(),
            v.size(),
            expected
        )));
    }
    Ok((q, v))
}

pub struct Dists {
    /// `[T, B, N]`, the statistics of the trust region.
    mu: Tensor,
    sigma: Tensor,

    /// `[T, B, N]`
    behavior_mu: Tensor,
    behavior_sigma: Tensor,

    /// `[T, B, N]`
    avg_mu: Tensor,
    avg_sigma: Tensor,

    /// `[T + 1, B, N]`, realized actions followed by an action sampled from
    /// the target policy at the bootstrap step.
    action_plus_1: Tensor,

    /// `[T + 1, B, N]`, actions sampled from the target policy.
    action_prime: Tensor,
}

pub struct Values {
    /// `[T + 1, B]`, detached.
    q: Tensor,

    /// `[T + 1, B]`, detached.
    v: Tensor,

    /// `[T, B]`, action values of `action_prime`.
    q_prime: Tensor,
}

pub struct Ratios {
    /// `[T, B, N]`
    ratio: Tensor,

    /// `[T, B]`, geometric mean of `ratio` over the action dimensions.
    ratio_dim: Tensor,

    /// `[T, B]`, product of `ratio` over the action dimensions.
    ratio_joint: Tensor,

    /// `[T, B, N]`, ratios of `action_prime`.
    ratio_prime: Tensor,
}

impl ActionSpace for Continuous {
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
        let (mu, sigma) = self.gaussian(&target)?;
        let (avg_mu, avg_sigma) = self.gaussian(&avg)?;
        let (behavior_mu, behavior_sigma) = match &batch.behavior {
            BehaviorParams::Gaussian { mu, sigma } => (mu.shallow_clone(), sigma.shallow_clone()),
            _ => return Err(malformed("expected Gaussian behavior parameters")),
        };

        let bootstrap = normal_sample(&mu.get(t_len), &sigma.get(t_len)).unsqueeze(0);
        let action_plus_1 = Tensor::cat(&[&batch.action, &bootstrap], 0);
        let action_prime = normal_sample(mu, sigma);

        Ok(Dists {
            mu: mu.narrow(0, 0, t_len),
            sigma: sigma.narrow(0, 0, t_len),
            behavior_mu,
            behavior_sigma,
            avg_mu: avg_mu.narrow(0, 0, t_len).detach(),
            avg_sigma: avg_sigma.narrow(0, 0, t_len).detach(),
            action_plus_1,
            action_prime,
        })
    }

    fn evaluate_critic(
        &self,
        critic: &CriticFn,
        batch: &TrajectoryBatch,
        dists: &Dists,
    ) -> Result<Values> {
        let t_len = batch.unroll_len();
        let expected = [t_len + 1, batch.batch_size()];
        let (q, v) = q_and_v(critic(&batch.obs_plus_1, Some(&dists.action_plus_1)), &expected)?;
        let q_prime = tch::no_grad(|| {
            q_and_v(critic(&batch.obs_plus_1, Some(&dists.action_prime)), &expected)
        })?
        .0;
        ensure_finite("q_value", &q)?;
        ensure_finite("v_value", &v)?;
        ensure_finite("q_value", &q_prime)?;

        Ok(Values {
            q: q.detach(),
            v: v.detach(),
            q_prime: q_prime.narrow(0, 0, t_len),
        })
    }

    fn compute_ratio(&self, dists: &Dists, batch: &TrajectoryBatch) -> Ratios {
        tch::no_grad(|| {
            let t_len = batch.unroll_len();
            let (mu, sigma) = (dists.mu.detach(), dists.sigma.detach());
            let ratio_of = |action: &Tensor| {
                let target_pi = normal_log_prob(action, &mu, &sigma).exp();
                let behavior_pi =
                    normal_log_prob(action, &dists.behavior_mu, &dists.behavior_sigma).exp();
                target_pi / (behavior_pi + EPS)
            };

            let ratio = ratio_of(&batch.action);
            let ratio_prime = ratio_of(&dists.action_prime.narrow(0, 0, t_len));
            let ratio_dim = ratio
                .pow_tensor_scalar(1.0 / self.action_dim as f64)
                .prod_dim_int(-1, false, Kind::Float);
            let ratio_joint = ratio.prod_dim_int(-1, false, Kind::Float);

            Ratios {
                ratio,
                ratio_dim,
                ratio_joint,
                ratio_prime,
            }
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
            let t_len = batch.unroll_len();
            let q = values.q.narrow(0, 0, t_len);
            let not_done = not_done(&batch.done);
            let trace = clipped_trace(&ratios.ratio_dim, params.lambda, params.c_clip_ratio);
            let q_ret = q_retrace(&q, &values.v, &batch.reward, &not_done, &trace, params.gamma);
            let q_opc = q_opc(&q, &values.v, &batch.reward, &not_done, params.gamma);

            Targets {
                q_ret: q_ret.narrow(0, 0, t_len),
                q_opc: Some(q_opc.narrow(0, 0, t_len)),
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
        let t_len = batch.unroll_len();
        let v = values.v.narrow(0, 0, t_len);
        let q_opc = targets.q_opc.as_ref().unwrap_or(&targets.q_ret);

        let log_pi = normal_log_prob(&batch.action, &dists.mu, &dists.sigma);
        let adv = (q_opc - &v).unsqueeze(-1);
        let pg = sum_last(&(ratios.ratio.clamp_max(c_clip_ratio) * adv * log_pi));

        // Bias correction evaluated at actions sampled from the target policy
        let action_prime = dists.action_prime.narrow(0, 0, t_len);
        let log_pi_prime = normal_log_prob(&action_prime, &dists.mu, &dists.sigma);
        let coeff = (1.0f64 - c_clip_ratio * (&ratios.ratio_prime + EPS).reciprocal()).relu();
        let adv_prime = (&values.q_prime - &v).unsqueeze(-1);
        let bc = sum_last(&(coeff * adv_prime * log_pi_prime));

        ActorTerms {
            pg,
            bc,
            entropy: sum_last(&normal_entropy(&dists.sigma)),
        }
    }

    fn policy_stats(&self, dists: &Dists) -> Vec<Tensor> {
        vec![dists.mu.shallow_clone(), dists.sigma.shallow_clone()]
    }

    fn kl_gradient(&self, dists: &Dists) -> Vec<Tensor> {
        let (k_mu, k_sigma) = normal_kl_grad(
            &dists.avg_mu,
            &dists.avg_sigma,
            &dists.mu.detach(),
            &dists.sigma.detach(),
        );
        vec![k_mu, k_sigma]
    }

    fn kl_div(&self, dists: &Dists) -> Tensor {
        tch::no_grad(|| {
            sum_last(&normal_kl(
                &dists.avg_mu,
                &dists.avg_sigma,
                &dists.mu.detach(),
                &dists.sigma.detach(),
            ))
        })
    }

    fn critic_loss(
        &self,
        critic: &CriticFn,
        batch: &TrajectoryBatch,
        dists: &Dists,
        _values: &Values,
        ratios: &Ratios,
        targets: &Targets,
        loss: &CriticLoss,
    ) -> Result<Tensor> {
        // Evaluated again on the same inputs, with gradients
        let t_len = batch.unroll_len();
        let expected = [t_len + 1, batch.batch_size()];
        let (q, v) = q_and_v(critic(&batch.obs_plus_1, Some(&dists.action_plus_1)), &expected)?;
        let (q, v) = (q.narrow(0, 0, t_len), v.narrow(0, 0, t_len));

        let v_target = tch::no_grad(|| {
            ratios.ratio_joint.clamp_max(1.0) * (&targets.q_ret - q.detach()) + v.detach()
        });

        Ok(loss.elementwise(&q, &targets.q_ret) + loss.elementwise(&v, &v_target))
    }

    fn sample_action(&self, params: &PolicyParams, noise_ratio: f64) -> Result<Tensor> {
        let (mu, sigma) = self.gaussian(params)?;
        let action = normal_sample(mu, sigma);
        if noise_ratio > 0.0 {
            Ok(tch::no_grad(|| &action + noise_ratio * action.randn_like()))
        } else {
            Ok(action)
        }
    }

    fn greedy_action(&self, params: &PolicyParams) -> Result<Tensor> {
        let (mu, _) = self.gaussian(params)?;
        Ok(mu.detach())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const T: i64 = 3;
    const B: i64 = 2;
    const N: i64 = 2;

    #[test]
    fn test_same_policies() {
        let space = Continuous::new(N);
        let mu = Tensor::randn([T + 1, B, N], tch::kind::FLOAT_CPU).set_requires_grad(true);
        let sigma = Tensor::ones([T + 1, B, N], tch::kind::FLOAT_CPU).set_requires_grad(true);
        let batch = TrajectoryBatch {
            obs_plus_1: Tensor::randn([T + 1, B, 4], tch::kind::FLOAT_CPU),
            action: Tensor::randn([T, B, N], tch::kind::FLOAT_CPU),
            reward: Tensor::ones([T, B], tch::kind::FLOAT_CPU),
            done: Tensor::zeros([T, B], tch::kind::FLOAT_CPU),
            weight: None,
            behavior: BehaviorParams::Gaussian {
                mu: mu.narrow(0, 0, T).detach(),
                sigma: sigma.narrow(0, 0, T).detach(),
            },
        };
        let critic = |obs: &Tensor, _: Option<&Tensor>| CriticOutput {
            q_value: obs.narrow(-1, 0, 1),
            v_value: Some(obs.narrow(-1, 1, 1)),
        };

        let dists = space
            .build_distributions(
                PolicyParams::Gaussian {
                    mu: mu.shallow_clone(),
                    sigma: sigma.shallow_clone(),
                },
                PolicyParams::Gaussian {
                    mu: mu.detach(),
                    sigma: sigma.detach(),
                },
                &batch,
            )
            .unwrap();
        assert_eq!(dists.action_plus_1.size(), vec![T + 1, B, N]);
        assert_eq!(dists.action_prime.size(), vec![T + 1, B, N]);

        let values = space.evaluate_critic(&critic, &batch, &dists).unwrap();
        let ratios = space.compute_ratio(&dists, &batch);
        let ratio = &ratios.ratio_dim - 1.0;
        assert!(ratio.abs().max().double_value(&[]) < 1e-4);

        let params = ReturnParams {
            gamma: 0.9,
            lambda: 1.0,
            c_clip_ratio: 10.0,
        };
        let targets = space.compute_retrace(&values, &ratios, &batch, &params);
        assert_eq!(targets.q_ret.size(), vec![T, B]);
        assert_eq!(targets.q_opc.as_ref().unwrap().size(), vec![T, B]);

        assert!(space.kl_div(&dists).abs().max().double_value(&[]) < 1e-5);
        for k in space.kl_gradient(&dists) {
            assert!(k.abs().max().double_value(&[]) < 1e-5);
        }

        let terms = space.actor_terms(&dists, &values, &ratios, &targets, &batch, 10.0);
        assert_eq!(terms.pg.size(), vec![T, B]);
        assert_eq!(terms.bc.size(), vec![T, B]);
        assert_eq!(terms.entropy.size(), vec![T, B]);

        let loss = space
            .critic_loss(&critic, &batch, &dists, &values, &ratios, &targets, &CriticLoss::Mse)
            .unwrap();
        assert_eq!(loss.size(), vec![T, B]);
    }

    #[test]
    fn test_critic_without_state_values_is_rejected() {
        let out = CriticOutput {
            q_value: Tensor::zeros([T + 1, B, 1], tch::kind::FLOAT_CPU),
            v_value: None,
        };
        let result = q_and_v(out, &[T + 1, B]);
        match result {
            Err(e) => assert!(matches!(
                e.downcast_ref::<acer_core::error::AcerError>(),
                Some(acer_core::error::AcerError::ConfigMismatch(_))
            )),
            Ok(_) => panic!("critic without state values was accepted"),
        }
    }
}
