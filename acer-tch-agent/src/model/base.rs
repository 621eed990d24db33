//! Definition of interfaces of neural networks.
use anyhow::Result;
use std::path::Path;
use tch::nn::VarStore;

/// Base interface of a network owning its parameters.
pub trait ModelBase {
    /// Returns `var_store` as mutable reference.
    fn get_var_store_mut(&mut self) -> &mut VarStore;

    /// Returns `var_store`.
    fn get_var_store(&self) -> &VarStore;

    /// Save parameters of the neural network.
    fn save<T: AsRef<Path>>(&self, path: T) -> Result<()>;

    /// Load parameters of the neural network.
    fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()>;
}

/// Neural network model that can be initialized with [`VarStore`] and configuration.
///
/// The purpose of this trait is for modularity of neural network models.
/// Modules, which consists a neural network, should share [`VarStore`].
/// To do this, structs implementing this trait can be initialized with a given [`VarStore`].
/// This trait also provide the ability to clone with a given [`VarStore`],
/// which is used when creating the average policy network of ACER.
///
/// [`VarStore`]: https://docs.rs/tch/0.16.0/tch/nn/struct.VarStore.html
pub trait SubModel {
    /// Configuration from which [`SubModel`] is constructed.
    type Config;

    /// Input of the [`SubModel`].
    type Input;

    /// Output of the [`SubModel`].
    type Output;

    /// Builds [`SubModel`] with [`VarStore`] and [`SubModel::Config`].
    fn build(var_store: &VarStore, config: Self::Config) -> Self;

    /// Clones [`SubModel`] with [`VarStore`].
    ///
    /// [`VarStore`]: https://docs.rs/tch/0.16.0/tch/nn/struct.VarStore.html
    fn clone_with_var_store(&self, var_store: &VarStore) -> Self;

    /// A generalized forward function.
    fn forward(&self, input: &Self::Input) -> Self::Output;
}
