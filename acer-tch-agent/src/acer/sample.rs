//! Preparation of training samples from collected experiences.
use super::{BehaviorLogit, Transition};
use log::warn;
use tch::Tensor;

/// Output of the policy for a single environment.
pub struct PolicyOutput {
    /// Parameters of the policy distribution the action was drawn from.
    pub logit: BehaviorLogit,

    pub action: Tensor,
}

/// Result of an environment step.
pub struct Timestep {
    /// The observation after the step.
    pub obs: Tensor,
    pub reward: f32,
    pub done: bool,
}

/// Builds a transition from the observation, the policy output and the result of the step.
pub fn process_transition(obs: &Tensor, output: &PolicyOutput, timestep: Timestep) -> Transition {
    Transition {
        obs: obs.shallow_clone(),
        next_obs: timestep.obs,
        logit: output.logit.clone(),
        action: output.action.shallow_clone(),
        reward: timestep.reward,
        done: timestep.done,
        weight: None,
    }
}

/// Splits a trajectory into sequences of `unroll_len` transitions.
///
/// When the length of the trajectory is not a multiple of `unroll_len`, the
/// last sequence is made of the last `unroll_len` transitions, so that it
/// overlaps the preceding one. A trajectory shorter than `unroll_len` yields
/// no sequence.
pub fn get_train_sample(trajectory: &[Transition], unroll_len: usize) -> Vec<Vec<Transition>> {
    let len = trajectory.len();
    if unroll_len == 0 || len < unroll_len {
        warn!(
            "Trajectory of length {} is shorter than unroll length {}",
            len, unroll_len
        );
        return vec![];
    }

    let mut samples: Vec<Vec<Transition>> = trajectory
        .chunks_exact(unroll_len)
        .map(|chunk| chunk.to_vec())
        .collect();
    if len % unroll_len != 0 {
        samples.push(trajectory[len - unroll_len..].to_vec());
    }
    samples
}

#[cfg(test)]
mod test {
    use super::*;

    fn trajectory(len: usize) -> Vec<Transition> {
        (0..len)
            .map(|i| {
                let output = PolicyOutput {
                    logit: BehaviorLogit::Discrete(Tensor::zeros([2], tch::kind::FLOAT_CPU)),
                    action: Tensor::from(0i64),
                };
                let timestep = Timestep {
                    obs: Tensor::from(i as f32 + 1.0),
                    reward: i as f32,
                    done: i + 1 == len,
                };
                process_transition(&Tensor::from(i as f32), &output, timestep)
            })
            .collect()
    }

    fn rewards(seq: &[Transition]) -> Vec<f32> {
        seq.iter().map(|tr| tr.reward).collect()
    }

    #[test]
    fn test_exact_chunks() {
        let samples = get_train_sample(&trajectory(6), 3);
        assert_eq!(samples.len(), 2);
        assert_eq!(rewards(&samples[0]), vec![0.0, 1.0, 2.0]);
        assert_eq!(rewards(&samples[1]), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_overlapping_last_chunk() {
        let samples = get_train_sample(&trajectory(7), 3);
        assert_eq!(samples.len(), 3);
        assert_eq!(rewards(&samples[2]), vec![4.0, 5.0, 6.0]);
        assert!(samples[2][2].done);
    }

    #[test]
    fn test_short_trajectory() {
        assert!(get_train_sample(&trajectory(2), 3).is_empty());
    }
}
