use super::{mlp, MlpConfig};
use crate::model::SubModel;
use tch::{nn, nn::Module, Device, Tensor};

/// Multilayer perceptron with ReLU activation function.
pub struct Mlp {
    config: MlpConfig,
    device: Device,
    seq: nn::Sequential,
}

impl Mlp {
    fn create_net(var_store: &nn::VarStore, config: &MlpConfig) -> nn::Sequential {
        let p = &(var_store.root() / "mlp");
        let mut seq = mlp("ln", var_store, config).add(nn::linear(
            p / format!("ln{}", config.units.len()),
            config.feature_dim(),
            config.out_dim,
            Default::default(),
        ));

        if config.activation_out {
            seq = seq.add_fn(|x| x.relu());
        }

        seq
    }
}

impl SubModel for Mlp {
    type Config = MlpConfig;
    type Input = Tensor;
    type Output = Tensor;

    fn forward(&self, x: &Self::Input) -> Tensor {
        self.seq.forward(&x.to(self.device))
    }

    fn build(var_store: &nn::VarStore, config: Self::Config) -> Self {
        let device = var_store.device();
        let seq = Self::create_net(var_store, &config);

        Self {
            config,
            device,
            seq,
        }
    }

    fn clone_with_var_store(&self, var_store: &nn::VarStore) -> Self {
        Self::build(var_store, self.config.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mlp_output_shape() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mlp = Mlp::build(&vs, MlpConfig::new(4, vec![8, 8], 3, false));
        let y = mlp.forward(&Tensor::zeros(&[5, 2, 4], tch::kind::FLOAT_CPU));
        assert_eq!(y.size(), vec![5, 2, 3]);
    }

    #[test]
    fn test_clone_with_var_store_shares_names() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mlp = Mlp::build(&vs, MlpConfig::new(4, vec![8], 3, true));
        let vs2 = nn::VarStore::new(Device::Cpu);
        let _mlp2 = mlp.clone_with_var_store(&vs2);

        let mut names1: Vec<_> = vs.variables().into_keys().collect();
        let mut names2: Vec<_> = vs2.variables().into_keys().collect();
        names1.sort();
        names2.sort();
        assert_eq!(names1, names2);
    }
}
