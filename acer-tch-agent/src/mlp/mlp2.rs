use super::{mlp, MlpConfig};
use crate::model::SubModel;
use tch::{nn, nn::Module, Device, Tensor};

const MIN_LSTD: f64 = -20.0;
const MAX_LSTD: f64 = 2.0;

/// Multilayer perceptron that outputs the mean and the standard deviation
/// of a diagonal Gaussian.
pub struct Mlp2 {
    config: MlpConfig,
    device: Device,
    head1: nn::Linear,
    head2: nn::Linear,
    seq: nn::Sequential,
}

impl SubModel for Mlp2 {
    type Config = MlpConfig;
    type Input = Tensor;
    type Output = (Tensor, Tensor);

    fn forward(&self, input: &Self::Input) -> Self::Output {
        let x = self.seq.forward(&input.to(self.device));
        let mean = x.apply(&self.head1);
        let std = x.apply(&self.head2).clamp(MIN_LSTD, MAX_LSTD).exp();
        (mean, std)
    }

    fn build(var_store: &nn::VarStore, config: Self::Config) -> Self {
        let seq = mlp("al", var_store, &config);
        let in_dim = config.feature_dim();
        let out_dim = config.out_dim;
        let p = &var_store.root();

        let head1 = nn::linear(p / "ml", in_dim, out_dim, Default::default());
        let head2 = nn::linear(p / "sl", in_dim, out_dim, Default::default());

        Self {
            config,
            device: var_store.device(),
            head1,
            head2,
            seq,
        }
    }

    fn clone_with_var_store(&self, var_store: &nn::VarStore) -> Self {
        Self::build(var_store, self.config.clone())
    }
}
