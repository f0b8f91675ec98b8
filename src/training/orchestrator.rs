//! Episode/round driver for training
//!
//! The orchestrator owns the round lifecycle, turns agent state deltas into
//! shaped rewards, feeds transitions to the [`Trainer`] and drives every
//! spawned agent with the trainer's policy. Model saves go through the
//! [`ModelIo`] actor so the simulation loop never waits on disk.

use std::collections::BTreeMap;
use std::path::Path;

use burn::tensor::backend::AutodiffBackend;
use tracing::{debug, info, warn};

use crate::infra::{AgentId, Battlefield, CombatAgent, Team, Vec3};
use crate::rl::env::{EnvConfig, apply_action, observation_from_entity};
use crate::rl::metrics::TrainingMetrics;
use crate::rl::observation::{Action, Observation};
use crate::rl::persist::{ModelIo, PendingSave, import_document};
use crate::rl::train::{Trainer, TrainingStats};

use super::reward::{DamageLedger, RewardConfig, RewardShaper, StepContext};
use super::round::{EndReason, RoundOutcome, RoundPhase, RoundState};

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Rounds to play before the final save
    pub total_rounds: usize,
    pub bots_per_team: usize,
    /// Round timer in seconds
    pub round_time_limit: f32,
    /// Optional hard cap on steps per round
    pub max_steps_per_round: Option<usize>,
    /// Save every N rounds; 0 disables periodic saves
    pub save_every: usize,
    pub model_name: String,
    /// Distance from the centre of procedurally generated spawn lines
    pub fallback_spawn_distance: f32,
    pub env: EnvConfig,
    pub reward: RewardConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            total_rounds: 100,
            bots_per_team: 3,
            round_time_limit: 60.0,
            max_steps_per_round: None,
            save_every: 10,
            model_name: "squadlab".to_string(),
            fallback_spawn_distance: 30.0,
            env: EnvConfig::default(),
            reward: RewardConfig::default(),
        }
    }
}

/// A transition held back one step so the terminal bonus can still be
/// added to it at round end.
#[derive(Debug, Clone)]
struct HeldTransition {
    obs: Observation,
    action: Action,
    reward: f32,
    next_obs: Observation,
    done: bool,
    log_prob: f32,
    value: f32,
}

/// Per-agent bookkeeping for one round.
#[derive(Debug, Clone)]
pub struct TrainedBot {
    pub id: AgentId,
    pub team: Team,
    pub spawn_position: Vec3,
    pub alive: bool,
    /// Seconds spent below the movement threshold
    pub stuck_seconds: f32,
    /// Damage dealt this round
    pub damage: DamageLedger,
    last_obs: Option<Observation>,
    last_action: Option<Action>,
    last_log_prob: f32,
    last_value: f32,
    /// `damage` at the previous step
    damage_seen: DamageLedger,
    held: Option<HeldTransition>,
}

impl TrainedBot {
    fn new(id: AgentId, team: Team, spawn_position: Vec3) -> Self {
        Self {
            id,
            team,
            spawn_position,
            alive: true,
            stuck_seconds: 0.0,
            damage: DamageLedger::default(),
            last_obs: None,
            last_action: None,
            last_log_prob: 0.0,
            last_value: 0.0,
            damage_seen: DamageLedger::default(),
            held: None,
        }
    }

    pub fn last_observation(&self) -> Option<&Observation> {
        self.last_obs.as_ref()
    }

    /// Value estimate from the bot's latest prediction
    pub fn last_value(&self) -> f32 {
        self.last_value
    }
}

/// What a round ended with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundSummary {
    pub round: usize,
    pub reason: EndReason,
    pub outcome: RoundOutcome,
    pub steps: usize,
    pub episode_reward: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepStatus {
    Running,
    RoundEnded(RoundSummary),
    Finished,
}

pub struct Orchestrator<B: AutodiffBackend> {
    config: OrchestratorConfig,
    trainer: Trainer<B>,
    shaper: RewardShaper,
    round: RoundState,
    bots: BTreeMap<AgentId, TrainedBot>,
    metrics: TrainingMetrics,
    io: Option<ModelIo>,
    pending_saves: Vec<PendingSave>,
    seen_training_steps: usize,
    total_steps: usize,
}

impl<B: AutodiffBackend> Orchestrator<B> {
    pub fn new(config: OrchestratorConfig, trainer: Trainer<B>) -> Self {
        Self {
            shaper: RewardShaper::new(config.reward.clone()),
            config,
            trainer,
            round: RoundState::new(),
            bots: BTreeMap::new(),
            metrics: TrainingMetrics::default(),
            io: None,
            pending_saves: Vec::new(),
            seen_training_steps: 0,
            total_steps: 0,
        }
    }

    /// Attach the model I/O actor used for periodic and final saves.
    pub fn with_model_io(mut self, io: ModelIo) -> Self {
        self.io = Some(io);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn trainer(&self) -> &Trainer<B> {
        &self.trainer
    }

    pub fn trainer_mut(&mut self) -> &mut Trainer<B> {
        &mut self.trainer
    }

    pub fn round(&self) -> &RoundState {
        &self.round
    }

    pub fn bots(&self) -> impl Iterator<Item = &TrainedBot> {
        self.bots.values()
    }

    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    pub fn stats(&self) -> TrainingStats {
        self.trainer.stats()
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn is_finished(&self) -> bool {
        self.round.phase() == RoundPhase::Finished
    }

    /// Advance by one simulation tick: start a round if idle, otherwise
    /// reward, record, predict and act for every live agent. A training
    /// pass due this tick runs after the last agent has acted.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn step<W: Battlefield>(&mut self, world: &mut W, dt: f32) -> StepStatus {
        self.poll_saves();

        match self.round.phase() {
            RoundPhase::Finished => return StepStatus::Finished,
            RoundPhase::Idle => self.start_round(world),
            RoundPhase::Active | RoundPhase::Ending => {}
        }

        self.credit_damage(world);

        let ids: Vec<AgentId> = self.bots.keys().copied().collect();
        for id in ids {
            self.step_bot(world, id, dt);
        }
        self.run_training();

        self.round.tick(dt);
        self.total_steps += 1;

        match self
            .round
            .end_condition(self.config.round_time_limit, self.config.max_steps_per_round)
        {
            Some(reason) => match self.end_round(world, reason) {
                Some(summary) if self.is_finished() => {
                    debug!("Last round summary: {:?}", summary);
                    StepStatus::Finished
                }
                Some(summary) => StepStatus::RoundEnded(summary),
                None => StepStatus::Running,
            },
            None => StepStatus::Running,
        }
    }

    fn start_round<W: Battlefield>(&mut self, world: &mut W) {
        for id in std::mem::take(&mut self.bots).into_keys() {
            world.despawn_agent(id);
        }
        if !self.round.begin() {
            return;
        }

        for team in Team::ALL {
            let points = spawn_points_or_line(
                world.spawn_points(team),
                team,
                self.config.bots_per_team,
                self.config.fallback_spawn_distance,
            );

            for i in 0..self.config.bots_per_team {
                let position = points[i % points.len()];
                let id = world.spawn_agent(team, position);
                if let Some(agent) = world.agent_mut(id) {
                    agent.set_external_control(true);
                }
                self.round.register(team, id);
                self.bots.insert(id, TrainedBot::new(id, team, position));
            }
        }

        info!(
            "Round {} started: {} bots per team",
            self.round.round_number(),
            self.config.bots_per_team
        );
    }

    fn credit_damage<W: Battlefield>(&mut self, world: &mut W) {
        for event in world.drain_damage_events() {
            if event.attacker == event.victim {
                continue;
            }
            let victim_team = self
                .bots
                .get(&event.victim)
                .map(|bot| bot.team)
                .or_else(|| world.agent(event.victim).map(|agent| agent.team()));
            let Some(attacker) = self.bots.get_mut(&event.attacker) else {
                continue;
            };
            let friendly = victim_team == Some(attacker.team);
            attacker.damage.record(event.amount, friendly);
        }
    }

    fn step_bot<W: Battlefield>(&mut self, world: &mut W, id: AgentId, dt: f32) {
        let Some(bot) = self.bots.get_mut(&id) else {
            return;
        };
        if !bot.alive {
            return;
        }

        let current = world
            .agent(id)
            .filter(|agent| agent.is_alive())
            .map(|agent| observation_from_entity(world, agent));
        let died = current.is_none();

        if let (Some(prev), Some(action)) = (bot.last_obs.as_ref(), bot.last_action) {
            let damage = bot.damage.since(&bot.damage_seen);
            bot.damage_seen = bot.damage;

            let (reward, next_obs) = match &current {
                Some(curr) => {
                    if self.shaper.is_moving(curr) {
                        bot.stuck_seconds = 0.0;
                    } else {
                        bot.stuck_seconds += dt;
                    }
                    let reward = self.shaper.step_reward(&StepContext {
                        prev,
                        curr,
                        damage,
                        died: false,
                        stuck_seconds: bot.stuck_seconds,
                    });
                    (reward, curr.clone())
                }
                None => {
                    let mut last = prev.clone();
                    last.health = world.agent(id).map_or(0.0, |agent| agent.health().max(0.0));
                    let reward = self.shaper.step_reward(&StepContext {
                        prev,
                        curr: &last,
                        damage,
                        died: true,
                        stuck_seconds: bot.stuck_seconds,
                    });
                    // Terminal step: the last observation is used twice
                    (reward, prev.clone())
                }
            };

            let transition = HeldTransition {
                obs: prev.clone(),
                action,
                reward,
                next_obs,
                done: died,
                log_prob: bot.last_log_prob,
                value: bot.last_value,
            };
            if let Some(held) = bot.held.replace(transition) {
                store(&mut self.trainer, id, held);
            }
        }

        let Some(obs) = current else {
            bot.alive = false;
            bot.last_action = None;
            self.round.mark_dead(id);
            debug!("Agent {} died in round {}", id, self.round.round_number());
            return;
        };

        let prediction = self.trainer.predict(&obs);
        if let Some(agent) = world.agent_mut(id) {
            apply_action(agent, &prediction.action, &self.config.env);
        }

        bot.last_obs = Some(obs);
        bot.last_action = Some(prediction.action);
        bot.last_log_prob = prediction.log_prob;
        bot.last_value = prediction.value;
    }

    /// Close the active round: terminal bonus on every bot's final
    /// transition, one `end_episode`, cleanup and saves.
    fn end_round<W: Battlefield>(&mut self, world: &mut W, reason: EndReason) -> Option<RoundSummary> {
        let outcome = self.round.begin_ending()?;
        let steps = self.round.steps();

        let bots = std::mem::take(&mut self.bots);
        for (id, bot) in bots {
            if let Some(mut held) = bot.held {
                held.reward = self.shaper.clamp(held.reward + self.shaper.terminal_bonus(bot.team, outcome));
                held.done = true;
                store(&mut self.trainer, id, held);
            }
            world.despawn_agent(id);
        }
        self.run_training();

        let episode_reward = self.trainer.end_episode();
        self.metrics
            .record_episode(episode_reward, steps, outcome.won_by(Team::TaskForce));

        let round = self.round.round_number();
        info!(
            "Round {} ended ({:?}): {:?}, steps={}, reward={:.2}",
            round, reason, outcome, steps, episode_reward
        );

        if self.config.save_every > 0 && round % self.config.save_every == 0 {
            self.queue_save();
        }

        if self.round.complete(self.config.total_rounds) == RoundPhase::Finished {
            if let Some(Err(e)) = self.trainer.finish_training() {
                warn!("Final training pass failed: {}", e);
            }
            self.record_training_reports();
            info!("All {} rounds played, saving final model", self.config.total_rounds);
            self.queue_save();
        }

        Some(RoundSummary {
            round,
            reason,
            outcome,
            steps,
            episode_reward,
        })
    }

    /// Abort the current round: remove spawned agents and drop held
    /// transitions without calling `end_episode`.
    pub fn abort<W: Battlefield>(&mut self, world: &mut W) {
        let count = self.bots.len();
        for id in std::mem::take(&mut self.bots).into_keys() {
            world.despawn_agent(id);
        }
        self.trainer.reset_episode();
        self.round.abort();
        info!(
            "Round {} aborted, {} agents removed",
            self.round.round_number(),
            count
        );
    }

    /// Run the pass the trainer has due, if any, and log its losses.
    fn run_training(&mut self) {
        if let Some(Err(e)) = self.trainer.run_scheduled() {
            warn!("Training pass failed: {}", e);
        }
        self.record_training_reports();
    }

    fn poll_saves(&mut self) {
        self.pending_saves.retain_mut(|pending| match pending.poll() {
            None => true,
            Some(Ok(())) => {
                info!("Saved model '{}'", pending.name());
                false
            }
            Some(Err(e)) => {
                warn!("Saving model '{}' failed: {}", pending.name(), e);
                false
            }
        });
    }

    fn record_training_reports(&mut self) {
        let steps = self.trainer.stats().training_steps;
        if steps != self.seen_training_steps {
            self.seen_training_steps = steps;
            if let Some(report) = self.trainer.last_report() {
                self.metrics
                    .record_losses(report.policy_loss, report.value_loss, report.entropy);
            }
        }
    }

    /// Snapshot the current weights and hand them to the I/O actor.
    pub fn queue_save(&mut self) {
        let Some(io) = &self.io else {
            debug!("No model store attached, skipping save");
            return;
        };
        match self.trainer.snapshot(&self.config.model_name) {
            Ok(snapshot) => self.pending_saves.push(io.save(snapshot)),
            Err(e) => warn!("Could not snapshot model for saving: {}", e),
        }
    }

    /// Wait for every queued save. Returns how many failed.
    pub async fn flush_saves(&mut self) -> usize {
        let mut failed = 0;
        for pending in self.pending_saves.drain(..) {
            let name = pending.name().to_string();
            match pending.wait().await {
                Ok(()) => info!("Saved model '{}'", name),
                Err(e) => {
                    warn!("Saving model '{}' failed: {}", name, e);
                    failed += 1;
                }
            }
        }
        failed
    }

    /// Load a named model from the store. Failures are logged and the
    /// current networks are kept.
    pub async fn restore(&mut self, name: &str) -> bool {
        let Some(io) = &self.io else {
            warn!("No model store attached, cannot load '{}'", name);
            return false;
        };
        let result = match io.load(name).await {
            Ok(snapshot) => self.trainer.restore(&snapshot),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Loading model '{}' failed, continuing with current networks: {}", name, e);
                false
            }
        }
    }

    /// Load an exported model document. Same failure policy as [`Self::restore`].
    pub fn import(&mut self, path: &Path) -> bool {
        match import_document(path).and_then(|snapshot| self.trainer.restore(&snapshot)) {
            Ok(()) => true,
            Err(e) => {
                warn!("Importing {} failed, continuing with current networks: {}", path.display(), e);
                false
            }
        }
    }
}

/// Map spawn points, or a procedural line when the map has none.
pub(crate) fn spawn_points_or_line(points: Option<Vec<Vec3>>, team: Team, count: usize, distance: f32) -> Vec<Vec3> {
    match points {
        Some(points) if !points.is_empty() => points,
        _ => {
            warn!("No spawn data for {:?}, using procedural spawn points", team);
            spawn_line(team, count, distance)
        }
    }
}

/// Procedural spawn points: one line per team, `distance` from the centre
/// along z, 4 units apart.
pub(crate) fn spawn_line(team: Team, count: usize, distance: f32) -> Vec<Vec3> {
    let z = match team {
        Team::TaskForce => -distance,
        Team::OpFor => distance,
    };
    let count = count.max(1);
    let center = (count - 1) as f32 / 2.0;
    (0..count)
        .map(|i| Vec3::new((i as f32 - center) * 4.0, 0.0, z))
        .collect()
}

fn store<B: AutodiffBackend>(trainer: &mut Trainer<B>, id: AgentId, t: HeldTransition) {
    trainer.store_experience(
        id,
        &t.obs,
        &t.action,
        t.reward,
        &t.next_obs,
        t.done,
        t.log_prob,
        t.value,
    );
}
