use anyhow::{anyhow, Result};
use std::{collections::HashMap, iter::FromIterator, path::Path};
use tch::{nn::VarStore, Device::Cpu, Tensor};

/// Named tensors holding a snapshot of model parameters or optimizer state.
pub struct NamedTensors {
    pub named_tensors: HashMap<String, Tensor>,
}

impl NamedTensors {
    /// Copy data of VarStore to CPU.
    pub fn copy_from(vs: &VarStore) -> Self {
        let src = vs.variables();

        tch::no_grad(|| NamedTensors {
            named_tensors: HashMap::from_iter(src.iter().map(|(k, v)| {
                let v = v.detach().to(Cpu).copy();
                (k.clone(), v)
            })),
        })
    }

    /// Copy named tensors to [VarStore].
    ///
    /// Fails if a variable of the [VarStore] has no counterpart in the snapshot.
    pub fn copy_to(&self, vs: &mut VarStore) -> Result<()> {
        let src = &self.named_tensors;
        let dest = &mut vs.variables();
        debug_assert_eq!(src.len(), dest.len());

        tch::no_grad(|| {
            for (name, dest) in dest.iter_mut() {
                let src = src
                    .get(name)
                    .ok_or_else(|| anyhow!("Variable {} is not in the snapshot", name))?;
                dest.copy_(src);
            }
            Ok(())
        })
    }

    /// Returns the tensor of the given name.
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.named_tensors.get(name)
    }

    /// Saves the tensors into a file.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let named: Vec<_> = self.named_tensors.iter().collect();
        Tensor::save_multi(&named, path)?;
        Ok(())
    }

    /// Loads tensors from a file.
    pub fn load<T: AsRef<Path>>(path: T) -> Result<Self> {
        let named = Tensor::load_multi(path)?;
        Ok(Self {
            named_tensors: HashMap::from_iter(named),
        })
    }
}

impl FromIterator<(String, Tensor)> for NamedTensors {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            named_tensors: HashMap::from_iter(iter),
        }
    }
}

impl Clone for NamedTensors {
    fn clone(&self) -> Self {
        let src = &self.named_tensors;

        tch::no_grad(|| NamedTensors {
            named_tensors: HashMap::from_iter(src.iter().map(|(k, v)| {
                let v = v.detach().to(Cpu).copy();
                (k.clone(), v)
            })),
        })
    }
}
