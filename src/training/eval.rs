//! Policy vs policy evaluation on the headless arena

use std::collections::BTreeMap;

use burn::prelude::*;
use tracing::{debug, info};

use crate::error::PolicyError;
use crate::infra::{AgentId, Battlefield, CombatAgent, Team};
use crate::rl::env::{EnvConfig, apply_action, observation_from_entity};
use crate::rl::metrics::EvaluationMetrics;
use crate::rl::observation::Observation;
use crate::policy::Policy;
use crate::state::{Arena, ArenaMap};

use super::orchestrator::spawn_points_or_line;
use super::reward::{DamageLedger, RewardConfig, RewardShaper, StepContext};
use super::round::RoundOutcome;

#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub bots_per_team: usize,
    pub round_time_limit: f32,
    pub max_steps_per_round: usize,
    /// Simulation step in seconds
    pub dt: f32,
    pub fallback_spawn_distance: f32,
    pub env: EnvConfig,
    /// Scores the TaskForce side
    pub reward: RewardConfig,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            bots_per_team: 3,
            round_time_limit: 60.0,
            max_steps_per_round: 1000,
            dt: 0.1,
            fallback_spawn_distance: 30.0,
            env: EnvConfig::default(),
            reward: RewardConfig::default(),
        }
    }
}

/// Outcome of a single evaluated round
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalRound {
    pub outcome: RoundOutcome,
    pub steps: usize,
    /// Summed shaped reward of the TaskForce agents
    pub reward: f32,
}

struct Tracked {
    team: Team,
    last_obs: Option<Observation>,
    damage: DamageLedger,
    damage_seen: DamageLedger,
    stuck_seconds: f32,
    alive: bool,
}

/// Plays `task_force` against `op_for`. No learning happens here.
pub struct EvaluationRunner<B: Backend> {
    config: EvalConfig,
    shaper: RewardShaper,
    task_force: Policy<B>,
    op_for: Policy<B>,
    metrics: EvaluationMetrics,
}

impl<B: Backend> EvaluationRunner<B> {
    /// Fails if either policy still needs its weights.
    pub fn new(config: EvalConfig, task_force: Policy<B>, op_for: Policy<B>) -> Result<Self, PolicyError> {
        if !task_force.is_loaded() || !op_for.is_loaded() {
            return Err(PolicyError::NotLoaded);
        }
        Ok(Self {
            shaper: RewardShaper::new(config.reward.clone()),
            config,
            task_force,
            op_for,
            metrics: EvaluationMetrics::new(),
        })
    }

    pub fn metrics(&self) -> &EvaluationMetrics {
        &self.metrics
    }

    /// Play `rounds` rounds on each named map, one fresh arena per round.
    pub fn evaluate(&mut self, maps: &[String], rounds: usize, seed: u64) -> &EvaluationMetrics {
        for map in maps {
            for round in 0..rounds {
                let mut world = Arena::new(ArenaMap::by_name(map), seed.wrapping_add(round as u64));
                let result = self.run_round(&mut world);
                debug!(
                    "{} round {}: {:?} after {} steps, reward={:.2}",
                    map,
                    round + 1,
                    result.outcome,
                    result.steps,
                    result.reward
                );
                self.metrics
                    .record_round(map, result.outcome.result(), result.reward, result.steps);
            }
            info!("Evaluated {} rounds on {}", rounds, map);
        }
        &self.metrics
    }

    /// Spawn both teams, play until elimination, timeout or the step cap,
    /// then remove every agent again.
    pub fn run_round(&mut self, world: &mut Arena) -> EvalRound {
        let mut bots: BTreeMap<AgentId, Tracked> = BTreeMap::new();
        for team in Team::ALL {
            let points = spawn_points_or_line(
                world.spawn_points(team),
                team,
                self.config.bots_per_team,
                self.config.fallback_spawn_distance,
            );
            for i in 0..self.config.bots_per_team {
                let id = world.spawn_agent(team, points[i % points.len()]);
                if let Some(agent) = world.agent_mut(id) {
                    agent.set_external_control(true);
                }
                bots.insert(
                    id,
                    Tracked {
                        team,
                        last_obs: None,
                        damage: DamageLedger::default(),
                        damage_seen: DamageLedger::default(),
                        stuck_seconds: 0.0,
                        alive: true,
                    },
                );
            }
        }

        let dt = self.config.dt;
        let mut reward = 0.0;
        let mut steps = 0;
        let mut elapsed = 0.0;

        loop {
            for event in world.drain_damage_events() {
                if event.attacker == event.victim {
                    continue;
                }
                let victim_team = bots.get(&event.victim).map(|b| b.team);
                if let Some(attacker) = bots.get_mut(&event.attacker) {
                    let friendly = victim_team == Some(attacker.team);
                    attacker.damage.record(event.amount, friendly);
                }
            }

            for (&id, bot) in bots.iter_mut().filter(|(_, b)| b.alive) {
                let current = world
                    .agent(id)
                    .filter(|agent| agent.is_alive())
                    .map(|agent| observation_from_entity(&*world, agent));

                if bot.team == Team::TaskForce {
                    if let Some(prev) = &bot.last_obs {
                        let damage = bot.damage.since(&bot.damage_seen);
                        bot.damage_seen = bot.damage;
                        let curr = current.clone().unwrap_or_else(|| {
                            let mut last = prev.clone();
                            last.health = 0.0;
                            last
                        });
                        if current.is_some() && !self.shaper.is_moving(&curr) {
                            bot.stuck_seconds += dt;
                        } else {
                            bot.stuck_seconds = 0.0;
                        }
                        reward += self.shaper.step_reward(&StepContext {
                            prev,
                            curr: &curr,
                            damage,
                            died: current.is_none(),
                            stuck_seconds: bot.stuck_seconds,
                        });
                    }
                }

                let Some(obs) = current else {
                    bot.alive = false;
                    continue;
                };
                let action = match bot.team {
                    Team::TaskForce => self.task_force.predict(&obs),
                    Team::OpFor => self.op_for.predict(&obs),
                };
                if let Some(agent) = world.agent_mut(id) {
                    apply_action(agent, &action, &self.config.env);
                }
                bot.last_obs = Some(obs);
            }

            let alive = |team: Team| bots.values().filter(|b| b.team == team && b.alive).count();
            let (task_force_alive, op_for_alive) = (alive(Team::TaskForce), alive(Team::OpFor));
            if task_force_alive == 0
                || op_for_alive == 0
                || elapsed >= self.config.round_time_limit
                || steps >= self.config.max_steps_per_round
            {
                let outcome = RoundOutcome::from_survivors(task_force_alive, op_for_alive);
                reward += self.shaper.terminal_bonus(Team::TaskForce, outcome) * self.config.bots_per_team as f32;
                for &id in bots.keys() {
                    world.despawn_agent(id);
                }
                return EvalRound {
                    outcome,
                    steps,
                    reward,
                };
            }

            world.step(dt);
            elapsed += dt;
            steps += 1;
        }
    }
}
