use super::ActorConfig;
use crate::{
    model::{ModelBase, SubModel},
    opt::{GradClip, Optimizer, OptimizerState},
    util::{ensure_finite, OutDim},
};
use anyhow::{Context, Result};
use log::{info, trace};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tch::{nn, Device, Tensor};

/// Parameters of a policy distribution given by the policy network.
pub enum PolicyParams {
    /// Logits of a categorical distribution.
    Logits(Tensor),

    /// Mean and standard deviation of a diagonal Gaussian.
    Gaussian { mu: Tensor, sigma: Tensor },
}

impl From<Tensor> for PolicyParams {
    fn from(logits: Tensor) -> Self {
        Self::Logits(logits)
    }
}

impl From<(Tensor, Tensor)> for PolicyParams {
    fn from((mu, sigma): (Tensor, Tensor)) -> Self {
        Self::Gaussian { mu, sigma }
    }
}

impl PolicyParams {
    /// Fails with a numerical instability error if a parameter is not finite.
    pub fn ensure_finite(&self, name: &str) -> Result<()> {
        match self {
            Self::Logits(logits) => ensure_finite(name, logits),
            Self::Gaussian { mu, sigma } => {
                ensure_finite(name, mu)?;
                ensure_finite(name, sigma)
            }
        }
    }
}

/// Stochastic policy of the ACER agent.
///
/// The learned policy owns an optimizer. Copies made with [`Actor::try_clone`]
/// have none and are only updated by soft updates from the learned policy.
pub struct Actor<P>
where
    P: SubModel<Input = Tensor>,
    P::Output: Into<PolicyParams>,
    P::Config: DeserializeOwned + Serialize + OutDim + Clone,
{
    device: Device,
    var_store: nn::VarStore,

    // Dimension of the output of the policy network
    pub(in crate::acer) out_dim: i64,

    pi: P,
    opt: Option<Optimizer>,
}

impl<P> Actor<P>
where
    P: SubModel<Input = Tensor>,
    P::Output: Into<PolicyParams>,
    P::Config: DeserializeOwned + Serialize + OutDim + Clone,
{
    /// Constructs [`Actor`].
    pub fn build(
        config: ActorConfig<P::Config>,
        grad_clip: Option<GradClip>,
        device: Device,
    ) -> Result<Actor<P>> {
        let pi_config = config.pi_config.context("pi_config is not set.")?;
        let out_dim = pi_config.get_out_dim();
        let var_store = nn::VarStore::new(device);
        let pi = P::build(&var_store, pi_config);
        let opt = config.opt_config.build(&var_store)?.grad_clip(grad_clip);

        Ok(Self {
            device,
            var_store,
            out_dim,
            pi,
            opt: Some(opt),
        })
    }

    /// Returns a copy of the policy with its own parameters and without an optimizer.
    pub fn try_clone(&self) -> Result<Self> {
        let mut var_store = nn::VarStore::new(self.device);
        let pi = self.pi.clone_with_var_store(&var_store);
        var_store.copy(&self.var_store)?;

        Ok(Self {
            device: self.device,
            var_store,
            out_dim: self.out_dim,
            pi,
            opt: None,
        })
    }

    fn opt(&self) -> Result<&Optimizer> {
        self.opt.as_ref().context("actor has no optimizer")
    }

    fn opt_mut(&mut self) -> Result<&mut Optimizer> {
        self.opt.as_mut().context("actor has no optimizer")
    }

    /// Outputs the parameters of the policy distribution given observations.
    pub fn forward(&self, x: &Tensor) -> PolicyParams {
        self.pi.forward(x).into()
    }

    /// Zeroes the gradients of the parameters.
    pub fn zero_grad(&mut self) {
        if let Some(opt) = self.opt.as_mut() {
            opt.zero_grad();
        }
    }

    /// Returns `true` if the accumulated gradients are finite.
    pub fn grads_finite(&self) -> bool {
        self.opt.as_ref().map_or(true, |opt| opt.grads_finite())
    }

    /// Updates the parameters with the accumulated gradients.
    pub fn step(&mut self) -> Result<()> {
        self.opt_mut()?.step();
        Ok(())
    }

    /// Learning rate of the optimizer.
    pub fn lr(&self) -> Result<f64> {
        Ok(self.opt()?.lr())
    }

    /// Exports the state of the optimizer.
    pub fn opt_state(&self) -> Result<OptimizerState> {
        Ok(self.opt()?.state_dict())
    }

    /// Restores the state of the optimizer.
    pub fn load_opt_state(&mut self, state: &OptimizerState) -> Result<()> {
        self.opt_mut()?.load_state_dict(state)
    }

    /// Saves the state of the optimizer.
    pub fn save_opt<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.opt()?.save(path)
    }

    /// Loads the state of the optimizer.
    pub fn load_opt<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.opt_mut()?.load(path)
    }
}

impl<P> ModelBase for Actor<P>
where
    P: SubModel<Input = Tensor>,
    P::Output: Into<PolicyParams>,
    P::Config: DeserializeOwned + Serialize + OutDim + Clone,
{
    fn get_var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.var_store
    }

    fn get_var_store(&self) -> &nn::VarStore {
        &self.var_store
    }

    fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.var_store.save(&path)?;
        info!("Save actor to {:?}", path.as_ref());
        let vs = self.var_store.variables();
        for (name, _) in vs.iter() {
            trace!("Save variable {}", name);
        }
        Ok(())
    }

    fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.var_store.load(&path)?;
        info!("Load actor from {:?}", path.as_ref());
        Ok(())
    }
}
