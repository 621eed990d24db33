//! Categorical and diagonal Gaussian distributions over tensors.
use tch::{Kind, Tensor};

/// Small constant added to denominators and to arguments of `log`.
pub const EPS: f64 = 1e-8;

const LN_2PI: f64 = 1.8378770664093453;

/// Sums over the last dimension.
pub(super) fn sum_last(x: &Tensor) -> Tensor {
    x.sum_dim_intlist(Some([-1].as_slice()), false, Kind::Float)
}

/// Probabilities of a categorical distribution given logits.
pub fn softmax(logits: &Tensor) -> Tensor {
    logits.softmax(-1, Kind::Float)
}

/// Entropy of categorical distributions, reduced over the last dimension.
pub fn categorical_entropy(probs: &Tensor) -> Tensor {
    -sum_last(&(probs * (probs + EPS).log()))
}

/// `KL(p || q)` of categorical distributions, reduced over the last dimension.
pub fn categorical_kl(p: &Tensor, q: &Tensor) -> Tensor {
    sum_last(&(p * ((p + EPS).log() - (q + EPS).log())))
}

/// Elementwise log density of independent normal distributions.
pub fn normal_log_prob(x: &Tensor, mu: &Tensor, sigma: &Tensor) -> Tensor {
    let z = (x - mu) / sigma;
    -0.5 * z.square() - sigma.log() - 0.5 * LN_2PI
}

/// Elementwise entropy of independent normal distributions.
pub fn normal_entropy(sigma: &Tensor) -> Tensor {
    sigma.log() + 0.5 * (1.0 + LN_2PI)
}

/// Elementwise `KL(p || q)` of independent normal distributions.
pub fn normal_kl(mu_p: &Tensor, sigma_p: &Tensor, mu_q: &Tensor, sigma_q: &Tensor) -> Tensor {
    (sigma_q / sigma_p).log() + (sigma_p.square() + (mu_p - mu_q).square()) / (2.0 * sigma_q.square())
        - 0.5
}

/// Draws a sample from independent normal distributions without tracking gradients.
pub fn normal_sample(mu: &Tensor, sigma: &Tensor) -> Tensor {
    tch::no_grad(|| mu + sigma * mu.randn_like())
}
