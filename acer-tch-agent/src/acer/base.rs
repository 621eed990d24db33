use super::{
    action_space::{mismatch, ActionSpace, Continuous, Discrete, ReturnParams},
    retrace::validity_mask,
    sample::{get_train_sample, PolicyOutput},
    trust_region::project,
    AcerConfig, ActionSpaceKind, Actor, Critic, CriticInput, CriticOutput, PolicyParams,
    TrajectoryBatch, Transition,
};
use crate::{
    model::{ModelBase, SubModel},
    opt::OptimizerState,
    util::{ensure_finite, track, CriticLoss, NamedTensors, OutDim},
};
use acer_core::{
    error::AcerError,
    record::{Record, RecordStorage, RecordValue},
    ReplayBufferBase,
};
use anyhow::Result;
use log::{debug, info};
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::BTreeMap, fs, path::Path};
use tch::{Kind, Tensor};

/// Snapshot of the parameters and optimizer states of [`Acer`].
#[derive(Clone)]
pub struct AcerState {
    pub actor: NamedTensors,
    pub actor_avg: NamedTensors,
    pub critic: NamedTensors,
    pub actor_opt: OptimizerState,
    pub critic_opt: OptimizerState,
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// ACER agent, actor-critic with experience replay.
///
/// A learning step consumes `B` sequences of `T` transitions and runs the
/// following stages:
///
/// ```mermaid
/// graph LR
///     A[TrajectoryBatch]-->B[Distributions]
///     B-->C[Ratios]
///     B-->D[Critic]
///     C-->E[Retrace targets]
///     D-->E
///     E-->F[Actor objective]
///     F-->G[Trust region]
///     E-->H[Critic loss]
///     G-->I[Optimizer steps]
///     H-->I
///     I-->J[Average actor]
/// ```
///
/// The step is atomic: the parameters are updated only after both losses and
/// all gradients are known to be finite. Otherwise [`AcerError::NumericalInstability`]
/// is returned and neither network changes.
pub struct Acer<P, Q>
where
    P: SubModel<Input = Tensor>,
    P::Output: Into<PolicyParams>,
    P::Config: DeserializeOwned + Serialize + OutDim + Clone,
    Q: SubModel<Input = CriticInput, Output = CriticOutput>,
    Q::Config: DeserializeOwned + Serialize + Clone,
{
    pub(super) pi: Actor<P>,
    pub(super) pi_avg: Actor<P>,
    pub(super) qnet: Critic<Q>,
    pub(super) action_space: ActionSpaceKind,
    pub(super) return_params: ReturnParams,
    pub(super) unroll_len: usize,
    pub(super) entropy_weight: f64,
    pub(super) value_weight: f64,
    pub(super) trust_region: bool,
    pub(super) trust_region_value: f64,
    pub(super) target_theta: f64,
    pub(super) batch_size: usize,
    pub(super) update_per_collect: usize,
    pub(super) priority_is_weight: bool,
    pub(super) critic_loss: CriticLoss,
    pub(super) noise_ratio: f64,
    pub(super) n_opts: usize,
    pub(super) device: tch::Device,
}

impl<P, Q> Acer<P, Q>
where
    P: SubModel<Input = Tensor>,
    P::Output: Into<PolicyParams>,
    P::Config: DeserializeOwned + Serialize + OutDim + Clone,
    Q: SubModel<Input = CriticInput, Output = CriticOutput>,
    Q::Config: DeserializeOwned + Serialize + Clone,
{
    /// Constructs [`Acer`] agent.
    ///
    /// Fails with [`AcerError::ConfigMismatch`] if the configuration is inconsistent.
    pub fn build(config: AcerConfig<P::Config, Q::Config>) -> Result<Self> {
        if config.priority_is_weight && !config.priority {
            return Err(mismatch("priority_is_weight requires priority"));
        }
        if config.unroll_len == 0 || config.batch_size == 0 {
            return Err(mismatch("unroll_len and batch_size must be positive"));
        }
        let device: tch::Device = config
            .device
            .ok_or_else(|| mismatch("No device is given for ACER agent"))?
            .into();

        if let Some(seed) = config.seed.as_ref() {
            tch::manual_seed(*seed);
        }

        let pi = Actor::build(config.actor_config, config.grad_clip.clone(), device)?;
        if pi.out_dim != config.action_space.dim() {
            return Err(mismatch(format!(
                "actor output dimension {} does not match {:?}",
                pi.out_dim, config.action_space
            )));
        }
        let pi_avg = pi.try_clone()?;
        let qnet = Critic::build(config.critic_config, config.grad_clip, device)?;
        info!("Build ACER agent for {:?}", config.action_space);

        Ok(Acer {
            pi,
            pi_avg,
            qnet,
            action_space: config.action_space,
            return_params: ReturnParams {
                gamma: config.discount_factor,
                lambda: config.lambda,
                c_clip_ratio: config.c_clip_ratio,
            },
            unroll_len: config.unroll_len,
            entropy_weight: config.entropy_weight,
            value_weight: config.value_weight,
            trust_region: config.trust_region,
            trust_region_value: config.trust_region_value,
            target_theta: config.target_theta,
            batch_size: config.batch_size,
            update_per_collect: config.update_per_collect,
            priority_is_weight: config.priority_is_weight,
            critic_loss: config.critic_loss,
            noise_ratio: config.noise_ratio,
            n_opts: 0,
            device,
        })
    }

    /// Runs a learning step on `B` sequences of `unroll_len` transitions.
    ///
    /// Returns a record with `cur_actor_lr`, `cur_critic_lr`, `actor_loss`,
    /// `bc_loss`, `entropy_loss`, `total_actor_loss`, `critic_loss` and `kl_div`.
    pub fn learn(&mut self, batch: &[Vec<Transition>]) -> Result<Record> {
        let batch =
            TrajectoryBatch::from_sequences(batch, self.unroll_len, &self.action_space)?.to(self.device);
        if self.priority_is_weight && batch.weight.is_none() {
            return Err(AcerError::MalformedBatch("importance weights are missing".into()).into());
        }

        match self.action_space {
            ActionSpaceKind::Discrete { n_actions } => {
                self.learn_with(&Discrete::new(n_actions), &batch)
            }
            ActionSpaceKind::Continuous { action_dim } => {
                self.learn_with(&Continuous::new(action_dim), &batch)
            }
        }
    }

    fn learn_with<S: ActionSpace>(&mut self, space: &S, batch: &TrajectoryBatch) -> Result<Record> {
        let target = self.pi.forward(&batch.obs_plus_1);
        let avg = tch::no_grad(|| self.pi_avg.forward(&batch.obs_plus_1));
        target.ensure_finite("actor output")?;
        avg.ensure_finite("average actor output")?;

        let qnet = &self.qnet;
        let critic = |obs: &Tensor, act: Option<&Tensor>| qnet.forward(obs, act);

        let dists = space.build_distributions(target, avg, batch)?;
        let values = space.evaluate_critic(&critic, batch, &dists)?;
        let ratios = space.compute_ratio(&dists, batch);
        let targets = space.compute_retrace(&values, &ratios, batch, &self.return_params);
        ensure_finite("retrace targets", &targets.q_ret)?;

        // Loss weights
        let mask = validity_mask(&batch.done);
        let total_valid = mask.sum(Kind::Float);
        let weight = match (&batch.weight, self.priority_is_weight) {
            (Some(w), true) => &mask * w,
            _ => mask,
        };
        let reduce = |x: &Tensor| (x * &weight).sum(Kind::Float) / &total_valid;
        let scalar = |x: &Tensor| tch::no_grad(|| reduce(&x.detach()).double_value(&[]) as f32);

        // Actor
        let c_clip_ratio = self.return_params.c_clip_ratio;
        let terms = space.actor_terms(&dists, &values, &ratios, &targets, batch, c_clip_ratio);
        let objective = reduce(&(&terms.pg + &terms.bc + self.entropy_weight * &terms.entropy));
        ensure_finite("actor objective", &objective)?;

        let stats = space.policy_stats(&dists);
        let grads = Tensor::run_backward(&[&objective], &stats, true, false);
        let grads = if self.trust_region {
            project(&grads, &space.kl_gradient(&dists), self.trust_region_value)
        } else {
            grads
        };
        for g in grads.iter() {
            ensure_finite("policy gradient", g)?;
        }

        // Critic
        let critic_loss = reduce(&space.critic_loss(
            &critic,
            batch,
            &dists,
            &values,
            &ratios,
            &targets,
            &self.critic_loss,
        )?);
        ensure_finite("critic loss", &critic_loss)?;

        let record = Record::from_slice(&[
            ("cur_actor_lr", RecordValue::Scalar(self.pi.lr()? as f32)),
            ("cur_critic_lr", RecordValue::Scalar(self.qnet.lr() as f32)),
            ("actor_loss", RecordValue::Scalar(scalar(&terms.pg))),
            ("bc_loss", RecordValue::Scalar(scalar(&terms.bc))),
            ("entropy_loss", RecordValue::Scalar(scalar(&terms.entropy))),
            (
                "total_actor_loss",
                RecordValue::Scalar(objective.double_value(&[]) as f32),
            ),
            (
                "critic_loss",
                RecordValue::Scalar(critic_loss.double_value(&[]) as f32),
            ),
            ("kl_div", RecordValue::Scalar(scalar(&space.kl_div(&dists)))),
        ]);

        // The ascent direction is back-propagated through the policy statistics.
        let surrogate = stats
            .iter()
            .zip(grads.iter())
            .map(|(s, g)| (s * g).sum(Kind::Float))
            .collect::<Vec<_>>();
        let surrogate = Tensor::stack(&surrogate, 0).sum(Kind::Float);
        self.pi.zero_grad();
        self.qnet.zero_grad();
        (-surrogate).backward();
        (self.value_weight * critic_loss).backward();

        if !self.pi.grads_finite() || !self.qnet.grads_finite() {
            self.pi.zero_grad();
            self.qnet.zero_grad();
            return Err(AcerError::NumericalInstability("gradients".into()).into());
        }

        self.pi.step()?;
        self.qnet.step();
        track(&mut self.pi_avg, &self.pi, self.target_theta);
        self.n_opts += 1;
        debug!("Learning step {}: {:?}", self.n_opts, record);

        Ok(record)
    }

    /// Runs `update_per_collect` learning steps with batches sampled from the buffer.
    ///
    /// Stops early when sampling has evicted sequences so that the buffer holds
    /// less than `batch_size` of them. Returns `None` if no step was run,
    /// otherwise the mean of each metric over the steps that were run.
    pub fn opt_with_record<R>(&mut self, buffer: &mut R) -> Result<Option<Record>>
    where
        R: ReplayBufferBase<Batch = Vec<Vec<Transition>>>,
    {
        let mut storage = RecordStorage::new();
        for _ in 0..self.update_per_collect {
            if buffer.len() < self.batch_size {
                break;
            }
            let batch = buffer.batch(self.batch_size)?;
            storage.store(self.learn(&batch)?);
        }

        if storage.is_empty() {
            Ok(None)
        } else {
            Ok(Some(storage.aggregate()))
        }
    }

    /// Samples actions to be taken in the environments.
    ///
    /// The behavior parameters are returned with each action so that they
    /// can be stored with the transitions.
    pub fn collect_step(
        &self,
        obs: &BTreeMap<usize, Tensor>,
    ) -> Result<BTreeMap<usize, PolicyOutput>> {
        self.policy_outputs(obs, true)
    }

    /// Returns the most probable actions in the environments.
    pub fn eval_step(&self, obs: &BTreeMap<usize, Tensor>) -> Result<BTreeMap<usize, PolicyOutput>> {
        self.policy_outputs(obs, false)
    }

    fn policy_outputs(
        &self,
        obs: &BTreeMap<usize, Tensor>,
        explore: bool,
    ) -> Result<BTreeMap<usize, PolicyOutput>> {
        if obs.is_empty() {
            return Ok(BTreeMap::new());
        }
        let x = Tensor::stack(&obs.values().collect::<Vec<_>>(), 0).to(self.device);
        let params = tch::no_grad(|| self.pi.forward(&x));
        params.ensure_finite("actor output")?;

        match self.action_space {
            ActionSpaceKind::Discrete { n_actions } => {
                self.outputs_with(&Discrete::new(n_actions), obs, params, explore)
            }
            ActionSpaceKind::Continuous { action_dim } => {
                self.outputs_with(&Continuous::new(action_dim), obs, params, explore)
            }
        }
    }

    fn outputs_with<S: ActionSpace>(
        &self,
        space: &S,
        obs: &BTreeMap<usize, Tensor>,
        params: PolicyParams,
        explore: bool,
    ) -> Result<BTreeMap<usize, PolicyOutput>> {
        let action = if explore {
            space.sample_action(&params, self.noise_ratio)?
        } else {
            space.greedy_action(&params)?
        };

        Ok(obs
            .keys()
            .enumerate()
            .map(|(i, &env_id)| {
                let output = PolicyOutput {
                    logit: space.behavior_logit(&params, i as i64),
                    action: action.get(i as i64),
                };
                (env_id, output)
            })
            .collect())
    }

    /// Splits a collected trajectory into training sequences.
    pub fn get_train_sample(&self, trajectory: &[Transition]) -> Vec<Vec<Transition>> {
        get_train_sample(trajectory, self.unroll_len)
    }

    /// The number of learning steps done so far.
    pub fn n_opts(&self) -> usize {
        self.n_opts
    }

    /// Exports the parameters of the networks and the states of the optimizers.
    pub fn state_dict(&self) -> Result<AcerState> {
        Ok(AcerState {
            actor: NamedTensors::copy_from(self.pi.get_var_store()),
            actor_avg: NamedTensors::copy_from(self.pi_avg.get_var_store()),
            critic: NamedTensors::copy_from(self.qnet.get_var_store()),
            actor_opt: self.pi.opt_state()?,
            critic_opt: self.qnet.opt_state(),
        })
    }

    /// Restores the parameters of the networks and the states of the optimizers.
    pub fn load_state_dict(&mut self, state: &AcerState) -> Result<()> {
        state.actor.copy_to(self.pi.get_var_store_mut())?;
        state.actor_avg.copy_to(self.pi_avg.get_var_store_mut())?;
        state.critic.copy_to(self.qnet.get_var_store_mut())?;
        self.pi.load_opt_state(&state.actor_opt)?;
        self.qnet.load_opt_state(&state.critic_opt)?;
        info!("Load state of ACER agent");
        Ok(())
    }

    /// Saves the networks and the optimizer states in the directory.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        fs::create_dir_all(&path)?;
        let path = path.as_ref();
        self.pi.save(path.join("pi.pt.tch"))?;
        self.pi_avg.save(path.join("pi_avg.pt.tch"))?;
        self.qnet.save(path.join("qnet.pt.tch"))?;
        self.pi.save_opt(path.join("opt_pi.pt.tch"))?;
        self.qnet.save_opt(path.join("opt_qnet.pt.tch"))?;
        info!("Save ACER agent into {:?}", path);
        Ok(())
    }

    /// Loads the networks and the optimizer states from the directory.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.pi.load(path.join("pi.pt.tch"))?;
        self.pi_avg.load(path.join("pi_avg.pt.tch"))?;
        self.qnet.load(path.join("qnet.pt.tch"))?;
        self.pi.load_opt(path.join("opt_pi.pt.tch"))?;
        self.qnet.load_opt(path.join("opt_qnet.pt.tch"))?;
        info!("Load ACER agent from {:?}", path);
        Ok(())
    }
}
