//! Experience buffer and advantage estimation

use std::collections::BTreeMap;

use crate::infra::AgentId;

use super::observation::ACTION_SIZE;

/// One recorded transition plus the bookkeeping PPO needs.
#[derive(Debug, Clone)]
pub struct Experience {
    /// Agent that produced the transition
    pub agent: AgentId,
    /// Flattened observation
    pub observation: Vec<f32>,
    /// Action vector as produced by `predict`
    pub action: [f32; ACTION_SIZE],
    /// Clamped shaped reward
    pub reward: f32,
    /// Flattened next observation (same as `observation` on terminal steps)
    pub next_observation: Vec<f32>,
    pub done: bool,
    /// Log-probability at collection time
    pub log_prob: f32,
    /// Value estimate at collection time
    pub value: f32,
}

/// How GAE walks the buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GaeOrdering {
    /// One pass over the buffer in collection order, agents interleaved
    #[default]
    Buffer,
    /// Separate pass per agent over that agent's transitions
    PerAgent,
}

/// Bounded on-policy buffer. Cleared in full after each training pass.
#[derive(Debug, Clone)]
pub struct ExperienceBuffer {
    entries: Vec<Experience>,
    capacity: usize,
}

impl ExperienceBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a transition. Returns `false` and drops it when the buffer
    /// is already at capacity.
    pub fn push(&mut self, experience: Experience) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push(experience);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn entries(&self) -> &[Experience] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Move every entry out, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<Experience> {
        std::mem::replace(&mut self.entries, Vec::with_capacity(self.capacity))
    }
}

/// Generalized advantage estimation over one trajectory.
///
/// `next_value` of the last element is 0; a `done` step never bootstraps.
pub fn compute_gae(rewards: &[f32], values: &[f32], dones: &[bool], gamma: f32, lambda: f32) -> Vec<f32> {
    let n = rewards.len().min(values.len()).min(dones.len());
    let mut advantages = vec![0.0; n];

    let mut gae = 0.0;
    let mut next_value = 0.0;

    for t in (0..n).rev() {
        let not_done = if dones[t] { 0.0 } else { 1.0 };
        let delta = rewards[t] + gamma * next_value * not_done - values[t];
        gae = delta + gamma * lambda * not_done * gae;
        advantages[t] = gae;
        next_value = values[t];
    }

    advantages
}

/// Raw advantages and returns (`advantage + value`) for a batch.
pub fn advantages_and_returns(
    experiences: &[Experience],
    ordering: GaeOrdering,
    gamma: f32,
    lambda: f32,
) -> (Vec<f32>, Vec<f32>) {
    let advantages = match ordering {
        GaeOrdering::Buffer => {
            let rewards: Vec<f32> = experiences.iter().map(|e| e.reward).collect();
            let values: Vec<f32> = experiences.iter().map(|e| e.value).collect();
            let dones: Vec<bool> = experiences.iter().map(|e| e.done).collect();
            compute_gae(&rewards, &values, &dones, gamma, lambda)
        }
        GaeOrdering::PerAgent => {
            let mut trajectories: BTreeMap<AgentId, Vec<usize>> = BTreeMap::new();
            for (i, e) in experiences.iter().enumerate() {
                trajectories.entry(e.agent).or_default().push(i);
            }

            let mut advantages = vec![0.0; experiences.len()];
            for indices in trajectories.values() {
                let rewards: Vec<f32> = indices.iter().map(|&i| experiences[i].reward).collect();
                let values: Vec<f32> = indices.iter().map(|&i| experiences[i].value).collect();
                let dones: Vec<bool> = indices.iter().map(|&i| experiences[i].done).collect();
                let local = compute_gae(&rewards, &values, &dones, gamma, lambda);
                for (&i, a) in indices.iter().zip(local) {
                    advantages[i] = a;
                }
            }
            advantages
        }
    };

    let returns = advantages
        .iter()
        .zip(experiences)
        .map(|(a, e)| a + e.value)
        .collect();

    (advantages, returns)
}

/// Standardize to zero mean / unit variance, then clamp to `±limit`.
/// Non-finite inputs become 0.
pub fn normalize_advantages(advantages: &mut [f32], eps: f32, limit: f32) {
    if advantages.is_empty() {
        return;
    }
    for a in advantages.iter_mut() {
        if !a.is_finite() {
            *a = 0.0;
        }
    }

    let n = advantages.len() as f32;
    let mean = advantages.iter().sum::<f32>() / n;
    let var = advantages.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / n;
    let std = var.sqrt() + eps;

    for a in advantages.iter_mut() {
        let z = (*a - mean) / std;
        *a = if z.is_finite() { z.clamp(-limit, limit) } else { 0.0 };
    }
}
