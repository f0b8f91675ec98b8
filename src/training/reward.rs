//! Reward shaping

use crate::infra::Team;
use crate::rl::observation::{Observation, finite_or};

use super::round::RoundOutcome;

/// Reward weights. Magnitudes are tunable; the signs are not.
#[derive(Debug, Clone)]
pub struct RewardConfig {
    /// Per point of damage dealt to the opposing team
    pub damage_dealt: f32,
    /// Per point of damage dealt to the own team
    pub friendly_fire: f32,
    /// Per point of health lost
    pub health_lost: f32,
    /// Once, on the step a death is observed
    pub death: f32,
    /// Per step while moving faster than `movement_threshold`
    pub movement_bonus: f32,
    pub movement_threshold: f32,
    /// Per second spent below `movement_threshold`, applied every step
    pub camping_penalty: f32,
    pub win_bonus: f32,
    pub loss_penalty: f32,
    /// Rewards are clamped to `±clamp`
    pub clamp: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            damage_dealt: 0.1,
            friendly_fire: -0.2,
            health_lost: -0.05,
            death: -5.0,
            movement_bonus: 0.01,
            movement_threshold: 1.0,
            camping_penalty: -0.005,
            win_bonus: 5.0,
            loss_penalty: -5.0,
            clamp: 10.0,
        }
    }
}

/// Cumulative damage an agent has dealt this round.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DamageLedger {
    pub to_enemies: f32,
    pub to_allies: f32,
}

impl DamageLedger {
    pub fn record(&mut self, amount: f32, friendly: bool) {
        let amount = finite_or(amount, 0.0).max(0.0);
        if friendly {
            self.to_allies += amount;
        } else {
            self.to_enemies += amount;
        }
    }

    /// Damage dealt since `earlier`.
    pub fn since(&self, earlier: &DamageLedger) -> DamageLedger {
        DamageLedger {
            to_enemies: (self.to_enemies - earlier.to_enemies).max(0.0),
            to_allies: (self.to_allies - earlier.to_allies).max(0.0),
        }
    }
}

/// Everything that happened to one agent between two observations.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub prev: &'a Observation,
    pub curr: &'a Observation,
    pub damage: DamageLedger,
    pub died: bool,
    /// Seconds spent below the movement threshold
    pub stuck_seconds: f32,
}

#[derive(Debug, Clone, Default)]
pub struct RewardShaper {
    config: RewardConfig,
}

impl RewardShaper {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    pub fn clamp(&self, reward: f32) -> f32 {
        finite_or(reward, 0.0).clamp(-self.config.clamp, self.config.clamp)
    }

    pub fn is_moving(&self, obs: &Observation) -> bool {
        obs.horizontal_speed() > self.config.movement_threshold
    }

    /// Shaped, clamped reward for one step.
    pub fn step_reward(&self, step: &StepContext<'_>) -> f32 {
        let c = &self.config;
        let health_lost = (step.prev.health - step.curr.health).max(0.0);

        let mut reward = step.damage.to_enemies * c.damage_dealt
            + step.damage.to_allies * c.friendly_fire
            + health_lost * c.health_lost;

        if step.died {
            reward += c.death;
        } else if self.is_moving(step.curr) {
            reward += c.movement_bonus;
        } else {
            reward += c.camping_penalty * step.stuck_seconds.max(0.0);
        }

        self.clamp(reward)
    }

    /// One-time bonus for the team's final transition. Zero on a draw.
    pub fn terminal_bonus(&self, team: Team, outcome: RoundOutcome) -> f32 {
        match outcome {
            RoundOutcome::Draw => 0.0,
            RoundOutcome::Winner(winner) if winner == team => self.config.win_bonus,
            RoundOutcome::Winner(_) => self.config.loss_penalty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::Vec3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn obs(health: f32, speed: f32) -> Observation {
        let mut obs = Observation::new(Team::TaskForce);
        obs.health = health;
        obs.velocity = Vec3::new(speed, 0.0, 0.0);
        obs
    }

    fn ctx<'a>(prev: &'a Observation, curr: &'a Observation, damage: DamageLedger) -> StepContext<'a> {
        StepContext {
            prev,
            curr,
            damage,
            died: false,
            stuck_seconds: 0.0,
        }
    }

    #[test]
    fn test_relative_signs() {
        let shaper = RewardShaper::default();
        let moving = obs(100.0, 3.0);

        let dealt = DamageLedger {
            to_enemies: 10.0,
            to_allies: 0.0,
        };
        let friendly = DamageLedger {
            to_enemies: 0.0,
            to_allies: 10.0,
        };
        let r_dealt = shaper.step_reward(&ctx(&moving, &moving, dealt));
        let r_friendly = shaper.step_reward(&ctx(&moving, &moving, friendly));
        assert!(r_dealt > 0.0);
        assert!(r_friendly < 0.0);
        assert!(r_friendly.abs() > r_dealt.abs());

        let hurt = obs(80.0, 3.0);
        assert!(shaper.step_reward(&ctx(&moving, &hurt, DamageLedger::default())) < 0.0);
    }

    #[test]
    fn test_death_penalty() {
        let shaper = RewardShaper::default();
        let prev = obs(10.0, 0.0);
        let dead = obs(0.0, 0.0);
        let reward = shaper.step_reward(&StepContext {
            died: true,
            ..ctx(&prev, &dead, DamageLedger::default())
        });
        assert!((reward - (-5.0 - 0.5)).abs() < 1e-6);
    }

    #[test]
    fn test_camping_penalty_escalates() {
        let shaper = RewardShaper::default();
        let still = obs(100.0, 0.0);
        let short = shaper.step_reward(&StepContext {
            stuck_seconds: 1.0,
            ..ctx(&still, &still, DamageLedger::default())
        });
        let long = shaper.step_reward(&StepContext {
            stuck_seconds: 10.0,
            ..ctx(&still, &still, DamageLedger::default())
        });
        assert!(long < short && short < 0.0);

        let moving = obs(100.0, 2.0);
        let bonus = shaper.step_reward(&ctx(&moving, &moving, DamageLedger::default()));
        assert!((bonus - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_rewards_stay_within_clamp() {
        let shaper = RewardShaper::default();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..1000 {
            let prev = obs(rng.random_range(0.0..100.0), 0.0);
            let curr = obs(rng.random_range(0.0..100.0), rng.random_range(0.0..5.0));
            let damage = DamageLedger {
                to_enemies: rng.random_range(0.0..1000.0),
                to_allies: rng.random_range(0.0..1000.0),
            };
            let reward = shaper.step_reward(&StepContext {
                prev: &prev,
                curr: &curr,
                damage,
                died: rng.random_bool(0.2),
                stuck_seconds: rng.random_range(0.0..5000.0),
            });
            assert!((-10.0..=10.0).contains(&reward));
        }
        assert_eq!(shaper.clamp(f32::INFINITY), 0.0);
        assert_eq!(shaper.clamp(-1e9), -10.0);
    }

    #[test]
    fn test_terminal_bonus_is_symmetric() {
        let shaper = RewardShaper::default();
        let outcome = RoundOutcome::Winner(Team::TaskForce);
        assert_eq!(shaper.terminal_bonus(Team::TaskForce, outcome), 5.0);
        assert_eq!(shaper.terminal_bonus(Team::OpFor, outcome), -5.0);
        assert_eq!(shaper.terminal_bonus(Team::OpFor, RoundOutcome::Draw), 0.0);
    }

    #[test]
    fn test_ledger_since() {
        let mut ledger = DamageLedger::default();
        ledger.record(10.0, false);
        let snapshot = ledger;
        ledger.record(4.0, true);
        ledger.record(f32::NAN, false);
        let delta = ledger.since(&snapshot);
        assert_eq!(delta.to_enemies, 0.0);
        assert_eq!(delta.to_allies, 4.0);
    }
}
