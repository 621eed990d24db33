//! Trust-region projection of policy gradients.
use super::dist::{sum_last, EPS};
use tch::{Kind, Tensor};

/// Projects the ascent direction `z` onto the half-space `k·z <= delta`.
///
/// `z` and `k` are lists of tensors of matching shapes, one per statistic of
/// the policy distribution (probabilities, or mean and standard deviation).
/// The inner products are taken over the last dimension and summed across the
/// statistics, so the projection is applied independently at each `(t, b)`:
///
/// `z* = z - max(0, (k·z - delta) / (|k|^2 + eps)) k`
pub fn project(z: &[Tensor], k: &[Tensor], delta: f64) -> Vec<Tensor> {
    debug_assert!(!z.is_empty() && z.len() == k.len());

    tch::no_grad(|| {
        let kz = dot(k, z);
        let kk = dot(k, k);
        let scale = ((kz - delta).relu() / (kk + EPS)).unsqueeze(-1);
        z.iter().zip(k.iter()).map(|(z, k)| z - &scale * k).collect()
    })
}

fn dot(a: &[Tensor], b: &[Tensor]) -> Tensor {
    let terms: Vec<Tensor> = a.iter().zip(b.iter()).map(|(a, b)| sum_last(&(a * b))).collect();
    Tensor::stack(&terms, 0).sum_dim_intlist(Some([0].as_slice()), false, Kind::Float)
}

/// Gradient of `KL(avg || target)` of categorical distributions with respect to
/// the target probabilities, offset so that it vanishes when both coincide.
pub fn categorical_kl_grad(avg: &Tensor, target: &Tensor) -> Tensor {
    tch::no_grad(|| 1.0 - avg / (target + EPS))
}

/// Gradient of `KL(avg || target)` of diagonal Gaussians with respect to the
/// target mean and standard deviation.
pub fn normal_kl_grad(
    mu_avg: &Tensor,
    sigma_avg: &Tensor,
    mu: &Tensor,
    sigma: &Tensor,
) -> (Tensor, Tensor) {
    tch::no_grad(|| {
        let var = sigma.square();
        let k_mu = (mu - mu_avg) / &var;
        let k_sigma = sigma.reciprocal()
            - (sigma_avg.square() + (mu_avg - mu).square()) / (&var * sigma);
        (k_mu, k_sigma)
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::TryFrom;

    fn close(a: &Tensor, b: &Tensor) -> bool {
        (a - b).abs().max().double_value(&[]) < 1e-6
    }

    #[test]
    fn test_no_projection_when_policies_coincide() {
        let probs = Tensor::from_slice(&[0.2f32, 0.3, 0.5, 0.1, 0.1, 0.8]).view([2, 3]);
        let z = Tensor::randn([2, 3], tch::kind::FLOAT_CPU);
        let k = categorical_kl_grad(&probs, &probs);
        assert!(k.abs().max().double_value(&[]) < 1e-6);

        let z_ = project(&[z.shallow_clone()], &[k], 1.0);
        assert!(close(&z_[0], &z));

        let mu = Tensor::randn([2, 3], tch::kind::FLOAT_CPU);
        let sigma = Tensor::rand([2, 3], tch::kind::FLOAT_CPU) + 0.5;
        let (k_mu, k_sigma) = normal_kl_grad(&mu, &sigma, &mu, &sigma);
        let z_mu = Tensor::randn([2, 3], tch::kind::FLOAT_CPU);
        let z_sigma = Tensor::randn([2, 3], tch::kind::FLOAT_CPU);
        let z_ = project(
            &[z_mu.shallow_clone(), z_sigma.shallow_clone()],
            &[k_mu, k_sigma],
            1.0,
        );
        assert!(close(&z_[0], &z_mu));
        assert!(close(&z_[1], &z_sigma));
    }

    #[test]
    fn test_projection_satisfies_constraint() {
        let z = Tensor::from_slice(&[3f32, 4.0]).view([1, 2]);
        let k = Tensor::from_slice(&[1f32, 0.0]).view([1, 2]);
        let delta = 1.0;

        // k·z = 3 > delta, so the component along k is reduced to delta.
        let z_ = project(&[z], &[k.shallow_clone()], delta);
        let kz = (&k * &z_[0]).sum(Kind::Float).double_value(&[]);
        assert!((kz - delta).abs() < 1e-5);
        assert_eq!(Vec::<f32>::try_from(&z_[0].view([2])).unwrap()[1], 4.0);
    }

    #[test]
    fn test_normal_kl_grad_matches_autograd() {
        let mu_avg = Tensor::from_slice(&[0.1f32, -0.4]);
        let sigma_avg = Tensor::from_slice(&[0.8f32, 1.3]);
        let mu = Tensor::from_slice(&[0.5f32, 0.2]).set_requires_grad(true);
        let sigma = Tensor::from_slice(&[1.1f32, 0.7]).set_requires_grad(true);

        let kl = crate::acer::dist::normal_kl(&mu_avg, &sigma_avg, &mu, &sigma).sum(Kind::Float);
        let grads = Tensor::run_backward(&[&kl], &[&mu, &sigma], false, false);
        let (k_mu, k_sigma) = normal_kl_grad(&mu_avg, &sigma_avg, &mu, &sigma);

        assert!(close(&grads[0], &k_mu));
        assert!(close(&grads[1], &k_sigma));
    }
}
