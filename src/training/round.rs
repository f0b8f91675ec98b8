//! Round lifecycle state

use std::collections::HashSet;

use crate::infra::{AgentId, Team};
use crate::rl::metrics::RoundResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Idle,
    Active,
    Ending,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// One side has no agents left
    Elimination,
    /// The round timer ran out
    Timeout,
    /// `max_steps_per_round` reached
    StepLimit,
}

/// Result of a finished round, decided by which side had survivors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Winner(Team),
    Draw,
}

impl RoundOutcome {
    pub fn from_survivors(task_force_alive: usize, op_for_alive: usize) -> Self {
        match (task_force_alive > 0, op_for_alive > 0) {
            (true, false) => RoundOutcome::Winner(Team::TaskForce),
            (false, true) => RoundOutcome::Winner(Team::OpFor),
            _ => RoundOutcome::Draw,
        }
    }

    pub fn won_by(&self, team: Team) -> bool {
        *self == RoundOutcome::Winner(team)
    }

    pub fn result(&self) -> RoundResult {
        match self {
            RoundOutcome::Winner(Team::TaskForce) => RoundResult::TaskForce,
            RoundOutcome::Winner(Team::OpFor) => RoundResult::OpFor,
            RoundOutcome::Draw => RoundResult::Draw,
        }
    }
}

/// Round counters and alive sets, owned by the orchestrator and changed
/// only through the transition methods below.
#[derive(Debug, Clone)]
pub struct RoundState {
    phase: RoundPhase,
    round_number: usize,
    elapsed: f32,
    steps: usize,
    task_force_alive: HashSet<AgentId>,
    op_for_alive: HashSet<AgentId>,
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundState {
    pub fn new() -> Self {
        Self {
            phase: RoundPhase::Idle,
            round_number: 0,
            elapsed: 0.0,
            steps: 0,
            task_force_alive: HashSet::new(),
            op_for_alive: HashSet::new(),
        }
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// 1-based number of the current or last round
    pub fn round_number(&self) -> usize {
        self.round_number
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn alive(&self, team: Team) -> &HashSet<AgentId> {
        match team {
            Team::TaskForce => &self.task_force_alive,
            Team::OpFor => &self.op_for_alive,
        }
    }

    fn alive_mut(&mut self, team: Team) -> &mut HashSet<AgentId> {
        match team {
            Team::TaskForce => &mut self.task_force_alive,
            Team::OpFor => &mut self.op_for_alive,
        }
    }

    /// Idle -> Active. Returns false from any other phase.
    pub fn begin(&mut self) -> bool {
        if self.phase != RoundPhase::Idle {
            return false;
        }
        self.phase = RoundPhase::Active;
        self.round_number += 1;
        self.elapsed = 0.0;
        self.steps = 0;
        self.task_force_alive.clear();
        self.op_for_alive.clear();
        true
    }

    pub fn register(&mut self, team: Team, id: AgentId) {
        self.alive_mut(team).insert(id);
    }

    pub fn mark_dead(&mut self, id: AgentId) -> bool {
        self.task_force_alive.remove(&id) | self.op_for_alive.remove(&id)
    }

    pub fn tick(&mut self, dt: f32) {
        if self.phase == RoundPhase::Active {
            self.elapsed += dt;
            self.steps += 1;
        }
    }

    pub fn end_condition(&self, time_limit: f32, max_steps: Option<usize>) -> Option<EndReason> {
        if self.phase != RoundPhase::Active {
            return None;
        }
        if self.task_force_alive.is_empty() || self.op_for_alive.is_empty() {
            Some(EndReason::Elimination)
        } else if self.elapsed >= time_limit {
            Some(EndReason::Timeout)
        } else if max_steps.is_some_and(|max| self.steps >= max) {
            Some(EndReason::StepLimit)
        } else {
            None
        }
    }

    /// Active -> Ending, fixing the outcome from the current survivors.
    pub fn begin_ending(&mut self) -> Option<RoundOutcome> {
        if self.phase != RoundPhase::Active {
            return None;
        }
        self.phase = RoundPhase::Ending;
        Some(RoundOutcome::from_survivors(
            self.task_force_alive.len(),
            self.op_for_alive.len(),
        ))
    }

    /// Ending -> Idle, or Finished once `total_rounds` have been played.
    pub fn complete(&mut self, total_rounds: usize) -> RoundPhase {
        if self.phase == RoundPhase::Ending {
            self.phase = if self.round_number >= total_rounds {
                RoundPhase::Finished
            } else {
                RoundPhase::Idle
            };
        }
        self.phase
    }

    /// Drop the current round without an outcome. A finished run stays
    /// finished.
    pub fn abort(&mut self) {
        if self.phase != RoundPhase::Finished {
            self.phase = RoundPhase::Idle;
        }
        self.task_force_alive.clear();
        self.op_for_alive.clear();
    }
}
