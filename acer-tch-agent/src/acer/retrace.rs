//! Importance-weighted return targets.
//!
//! All functions in this module work on `[T, B]` tensors and are meant to be
//! called on detached values.
use tch::Tensor;

/// Returns `1 - done`, the mask used inside the return recursions.
pub fn not_done(done: &Tensor) -> Tensor {
    1.0 - done
}

/// Returns `1 - done` shifted right by one step along the time axis.
///
/// The first step of every sequence is always valid. This mask weights the
/// losses, so a step following a terminal transition does not contribute.
pub fn validity_mask(done: &Tensor) -> Tensor {
    let t_len = done.size()[0];
    let first = done.narrow(0, 0, 1).ones_like();
    let rest = not_done(&done.narrow(0, 0, t_len - 1));
    Tensor::cat(&[first, rest], 0)
}

/// Trace coefficient `lambda * clip(ratio, 0, c_clip_ratio)`.
pub fn clipped_trace(ratio: &Tensor, lambda: f64, c_clip_ratio: f64) -> Tensor {
    lambda * ratio.clamp(0.0, c_clip_ratio)
}

/// Computes Q-retrace targets.
///
/// * `q` - `[T, B]`, action values of the realized actions.
/// * `v` - `[T + 1, B]`, state values. `v[T]` bootstraps the recursion.
/// * `reward` - `[T, B]`
/// * `not_done` - `[T, B]`, see [`not_done`].
/// * `trace` - `[T, B]`, trace coefficients.
///
/// Returns `[T + 1, B]` targets whose last row equals `v[T]`.
pub fn q_retrace(
    q: &Tensor,
    v: &Tensor,
    reward: &Tensor,
    not_done: &Tensor,
    trace: &Tensor,
    gamma: f64,
) -> Tensor {
    let t_len = reward.size()[0];
    let bootstrap = v.get(t_len);
    let mut acc = bootstrap.shallow_clone();
    let mut rets = vec![bootstrap];

    for t in (0..t_len).rev() {
        let ret = reward.get(t) + gamma * not_done.get(t) * &acc;
        acc = trace.get(t) * (&ret - q.get(t)) + v.get(t);
        rets.push(ret);
    }

    rets.reverse();
    Tensor::stack(&rets, 0)
}

/// Computes Q-opc targets, the recursion of [`q_retrace`] with unit traces.
pub fn q_opc(q: &Tensor, v: &Tensor, reward: &Tensor, not_done: &Tensor, gamma: f64) -> Tensor {
    q_retrace(q, v, reward, not_done, &reward.ones_like(), gamma)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::TryFrom;
    use tch::Kind;

    fn to_vec(t: &Tensor) -> Vec<f32> {
        Vec::<f32>::try_from(&t.flatten(0, -1)).unwrap()
    }

    #[test]
    fn test_validity_mask() {
        let done = Tensor::zeros([4, 2], tch::kind::FLOAT_CPU);
        assert_eq!(to_vec(&validity_mask(&done)), vec![1.0; 8]);

        // A terminal step masks the following one; the first step is always valid.
        let done = Tensor::from_slice(&[1f32, 1.0, 0.0, 1.0, 0.0, 0.0]).view([3, 2]);
        let mask = validity_mask(&done);
        assert_eq!(to_vec(&mask), vec![1.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_clipped_trace() {
        let c = 10.0;
        let ratio = Tensor::from_slice(&[2.0 * c as f32, 0.5, -1.0]);
        let trace = clipped_trace(&ratio, 1.0, c);
        assert_eq!(to_vec(&trace), vec![c as f32, 0.5, 0.0]);

        let trace = clipped_trace(&ratio, 0.5, c);
        assert_eq!(to_vec(&trace), vec![0.5 * c as f32, 0.25, 0.0]);
    }

    #[test]
    fn test_bootstrap_step() {
        let q = Tensor::randn([3, 2], tch::kind::FLOAT_CPU);
        let v = Tensor::randn([4, 2], tch::kind::FLOAT_CPU);
        let reward = Tensor::randn([3, 2], tch::kind::FLOAT_CPU);
        let not_done = Tensor::ones([3, 2], tch::kind::FLOAT_CPU);
        let trace = Tensor::ones([3, 2], tch::kind::FLOAT_CPU);

        let ret = q_retrace(&q, &v, &reward, &not_done, &trace, 0.9);
        assert_eq!(ret.size(), vec![4, 2]);
        assert_eq!(to_vec(&ret.get(3)), to_vec(&v.get(3)));
    }

    #[test]
    fn test_recursion() {
        // T = 2, B = 1
        let q = Tensor::from_slice(&[1f32, 2.0]).view([2, 1]);
        let v = Tensor::from_slice(&[0.5f32, 1.5, 3.0]).view([3, 1]);
        let reward = Tensor::from_slice(&[1f32, -1.0]).view([2, 1]);
        let not_done = Tensor::from_slice(&[1f32, 1.0]).view([2, 1]);
        let trace = Tensor::from_slice(&[0.5f32, 0.5]).view([2, 1]);
        let gamma = 0.9;

        // ret[1] = -1 + 0.9 * 3.0 = 1.7
        // acc = 0.5 * (1.7 - 2.0) + 1.5 = 1.35
        // ret[0] = 1 + 0.9 * 1.35 = 2.215
        let ret = q_retrace(&q, &v, &reward, &not_done, &trace, gamma);
        let ret = to_vec(&ret);
        assert!((ret[0] - 2.215).abs() < 1e-5);
        assert!((ret[1] - 1.7).abs() < 1e-5);
        assert!((ret[2] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_done_cuts_bootstrap() {
        let q = Tensor::zeros([1, 1], tch::kind::FLOAT_CPU);
        let v = Tensor::from_slice(&[0f32, 100.0]).view([2, 1]);
        let reward = Tensor::from_slice(&[1f32]).view([1, 1]);
        let not_done = Tensor::zeros([1, 1], tch::kind::FLOAT_CPU);

        let ret = q_opc(&q, &v, &reward, &not_done, 0.99);
        assert_eq!(ret.get(0).sum(Kind::Float).double_value(&[]), 1.0);
    }
}
