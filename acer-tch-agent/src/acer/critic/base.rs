use super::CriticConfig;
use crate::{
    model::{ModelBase, SubModel},
    opt::{GradClip, Optimizer, OptimizerState},
};
use anyhow::{Context, Result};
use log::{info, trace};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tch::{nn, Device, Tensor};

/// Input of the value network.
pub struct CriticInput {
    /// `[*, obs_dim]`
    pub obs: Tensor,

    /// `[*, action_dim]`, given only for continuous action spaces.
    pub act: Option<Tensor>,
}

/// Output of the value network.
pub struct CriticOutput {
    /// `[*, N]` action values of all actions (discrete), or `[*, 1]` action
    /// values of the given actions (continuous).
    pub q_value: Tensor,

    /// `[*, 1]` state values, required for continuous action spaces.
    pub v_value: Option<Tensor>,
}

/// Value function of the ACER agent, together with its optimizer.
pub struct Critic<Q>
where
    Q: SubModel<Input = CriticInput, Output = CriticOutput>,
    Q::Config: DeserializeOwned + Serialize + Clone,
{
    var_store: nn::VarStore,
    q: Q,
    opt: Optimizer,
}

impl<Q> Critic<Q>
where
    Q: SubModel<Input = CriticInput, Output = CriticOutput>,
    Q::Config: DeserializeOwned + Serialize + Clone,
{
    /// Constructs [`Critic`].
    pub fn build(
        config: CriticConfig<Q::Config>,
        grad_clip: Option<GradClip>,
        device: Device,
    ) -> Result<Critic<Q>> {
        let q_config = config.q_config.context("q_config is not set.")?;
        let var_store = nn::VarStore::new(device);
        let q = Q::build(&var_store, q_config);
        let opt = config.opt_config.build(&var_store)?.grad_clip(grad_clip);

        Ok(Critic { var_store, q, opt })
    }

    /// Evaluates the value network.
    pub fn forward(&self, obs: &Tensor, act: Option<&Tensor>) -> CriticOutput {
        self.q.forward(&CriticInput {
            obs: obs.shallow_clone(),
            act: act.map(|a| a.shallow_clone()),
        })
    }

    /// Zeroes the gradients of the parameters.
    pub fn zero_grad(&mut self) {
        self.opt.zero_grad();
    }

    /// Returns `true` if the accumulated gradients are finite.
    pub fn grads_finite(&self) -> bool {
        self.opt.grads_finite()
    }

    /// Updates the parameters with the accumulated gradients.
    pub fn step(&mut self) {
        self.opt.step();
    }

    /// Learning rate of the optimizer.
    pub fn lr(&self) -> f64 {
        self.opt.lr()
    }

    /// Exports the state of the optimizer.
    pub fn opt_state(&self) -> OptimizerState {
        self.opt.state_dict()
    }

    /// Restores the state of the optimizer.
    pub fn load_opt_state(&mut self, state: &OptimizerState) -> Result<()> {
        self.opt.load_state_dict(state)
    }

    /// Saves the state of the optimizer.
    pub fn save_opt<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.opt.save(path)
    }

    /// Loads the state of the optimizer.
    pub fn load_opt<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.opt.load(path)
    }
}

impl<Q> ModelBase for Critic<Q>
where
    Q: SubModel<Input = CriticInput, Output = CriticOutput>,
    Q::Config: DeserializeOwned + Serialize + Clone,
{
    fn get_var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.var_store
    }

    fn get_var_store(&self) -> &nn::VarStore {
        &self.var_store
    }

    fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.var_store.save(&path)?;
        info!("Save critic to {:?}", path.as_ref());
        let vs = self.var_store.variables();
        for (name, _) in vs.iter() {
            trace!("Save variable {}", name);
        }
        Ok(())
    }

    fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.var_store.load(&path)?;
        info!("Load critic from {:?}", path.as_ref());
        Ok(())
    }
}
