//! Metrics and scalar logging for training and evaluation

use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::PersistError;

/// Moving average calculator
#[derive(Debug, Clone)]
pub struct MovingAverage {
    values: VecDeque<f32>,
    window_size: usize,
    sum: f32,
}

impl MovingAverage {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            values: VecDeque::with_capacity(window_size),
            window_size,
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f32) {
        if self.values.len() >= self.window_size {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }
        self.values.push_back(value);
        self.sum += value;
    }

    pub fn average(&self) -> f32 {
        if self.values.is_empty() {
            0.0
        } else {
            self.sum / self.values.len() as f32
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Training metrics tracker. Also the episode/step log the CLI summary
/// reports from.
#[derive(Debug)]
pub struct TrainingMetrics {
    /// Episode rewards
    pub episode_rewards: MovingAverage,
    /// Episode lengths in steps
    pub episode_lengths: MovingAverage,
    /// 1.0 when TaskForce won the round
    pub win_rate: MovingAverage,
    pub policy_loss: MovingAverage,
    pub value_loss: MovingAverage,
    pub entropy: MovingAverage,
    /// Episodes recorded so far
    pub episodes_logged: usize,
    /// Steps recorded so far
    pub steps_logged: usize,
    /// Training passes recorded so far
    pub passes_logged: usize,
    start_time: Instant,
}

impl TrainingMetrics {
    pub fn new(window_size: usize) -> Self {
        Self {
            episode_rewards: MovingAverage::new(window_size),
            episode_lengths: MovingAverage::new(window_size),
            win_rate: MovingAverage::new(window_size),
            policy_loss: MovingAverage::new(window_size),
            value_loss: MovingAverage::new(window_size),
            entropy: MovingAverage::new(window_size),
            episodes_logged: 0,
            steps_logged: 0,
            passes_logged: 0,
            start_time: Instant::now(),
        }
    }

    /// Record episode completion
    pub fn record_episode(&mut self, reward: f32, steps: usize, won: bool) {
        self.episode_rewards.push(reward);
        self.episode_lengths.push(steps as f32);
        self.win_rate.push(if won { 1.0 } else { 0.0 });
        self.episodes_logged += 1;
        self.steps_logged += steps;
    }

    /// Record training losses
    pub fn record_losses(&mut self, policy_loss: f32, value_loss: f32, entropy: f32) {
        self.policy_loss.push(policy_loss);
        self.value_loss.push(value_loss);
        self.entropy.push(entropy);
        self.passes_logged += 1;
    }

    /// Get training duration in seconds
    pub fn training_duration_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Get steps per second
    pub fn steps_per_second(&self) -> f64 {
        let duration = self.training_duration_secs();
        if duration > 0.0 {
            self.steps_logged as f64 / duration
        } else {
            0.0
        }
    }

    /// Log current metrics to console
    pub fn log_to_console(&self) {
        tracing::info!(
            "Episodes {} | Steps {} | SPS {:.1}",
            self.episodes_logged,
            self.steps_logged,
            self.steps_per_second()
        );
        tracing::info!(
            "  Episode: reward={:.2}, length={:.1}, win={:.1}%",
            self.episode_rewards.average(),
            self.episode_lengths.average(),
            self.win_rate.average() * 100.0
        );
        tracing::info!(
            "  Losses: policy={:.4}, value={:.4}, entropy={:.4}",
            self.policy_loss.average(),
            self.value_loss.average(),
            self.entropy.average()
        );
    }
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Appends `step,value` rows to one CSV file per tag.
pub struct ScalarLog {
    log_dir: PathBuf,
}

impl ScalarLog {
    pub fn new(log_dir: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let log_dir = log_dir.into();
        std::fs::create_dir_all(&log_dir).map_err(|source| PersistError::Io {
            path: log_dir.clone(),
            source,
        })?;
        Ok(Self { log_dir })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Log a scalar value. `/` in the tag becomes `_` in the file name.
    pub fn log_scalar(&mut self, tag: &str, value: f32, step: usize) -> Result<(), PersistError> {
        let path = self.log_dir.join(format!("{}.csv", tag.replace('/', "_")));
        let io_err = |source| PersistError::Io {
            path: path.clone(),
            source,
        };

        let file_exists = path.exists();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        if !file_exists {
            writeln!(file, "step,value").map_err(io_err)?;
        }
        writeln!(file, "{},{}", step, value).map_err(io_err)
    }

    /// Log the averaged training metrics at `step`.
    pub fn log_metrics(&mut self, metrics: &TrainingMetrics, step: usize) -> Result<(), PersistError> {
        self.log_scalar("episode/reward", metrics.episode_rewards.average(), step)?;
        self.log_scalar("episode/length", metrics.episode_lengths.average(), step)?;
        self.log_scalar("episode/win_rate", metrics.win_rate.average(), step)?;
        self.log_scalar("losses/policy", metrics.policy_loss.average(), step)?;
        self.log_scalar("losses/value", metrics.value_loss.average(), step)?;
        self.log_scalar("losses/entropy", metrics.entropy.average(), step)
    }
}

/// Per-map evaluation breakdown
#[derive(Debug, Clone, Default)]
pub struct MapStats {
    pub rounds: usize,
    pub task_force_wins: usize,
    pub op_for_wins: usize,
    pub draws: usize,
    pub total_reward: f32,
    pub total_steps: usize,
}

/// Evaluation metrics for comparing two policies
#[derive(Debug, Clone, Default)]
pub struct EvaluationMetrics {
    pub num_rounds: usize,
    pub task_force_wins: usize,
    pub op_for_wins: usize,
    pub draws: usize,
    /// Summed TaskForce reward across all rounds
    pub total_reward: f32,
    pub total_steps: usize,
    pub map_stats: BTreeMap<String, MapStats>,
}

/// Who won an evaluated round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundResult {
    TaskForce,
    OpFor,
    Draw,
}

impl EvaluationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_round(&mut self, map: &str, result: RoundResult, reward: f32, steps: usize) {
        self.num_rounds += 1;
        self.total_reward += reward;
        self.total_steps += steps;

        let stats = self.map_stats.entry(map.to_string()).or_default();
        stats.rounds += 1;
        stats.total_reward += reward;
        stats.total_steps += steps;

        match result {
            RoundResult::TaskForce => {
                self.task_force_wins += 1;
                stats.task_force_wins += 1;
            }
            RoundResult::OpFor => {
                self.op_for_wins += 1;
                stats.op_for_wins += 1;
            }
            RoundResult::Draw => {
                self.draws += 1;
                stats.draws += 1;
            }
        }
    }

    pub fn avg_reward(&self) -> f32 {
        if self.num_rounds > 0 {
            self.total_reward / self.num_rounds as f32
        } else {
            0.0
        }
    }

    /// TaskForce win rate
    pub fn win_rate(&self) -> f32 {
        if self.num_rounds > 0 {
            self.task_force_wins as f32 / self.num_rounds as f32
        } else {
            0.0
        }
    }

    pub fn avg_steps(&self) -> f32 {
        if self.num_rounds > 0 {
            self.total_steps as f32 / self.num_rounds as f32
        } else {
            0.0
        }
    }

    /// Print summary
    pub fn print_summary(&self) {
        tracing::info!("=== Evaluation Summary ===");
        tracing::info!("Rounds: {}", self.num_rounds);
        tracing::info!(
            "TaskForce wins: {} | OpFor wins: {} | Draws: {}",
            self.task_force_wins,
            self.op_for_wins,
            self.draws
        );
        tracing::info!("Win Rate: {:.1}%", self.win_rate() * 100.0);
        tracing::info!("Avg Reward: {:.2}", self.avg_reward());
        tracing::info!("Avg Steps: {:.1}", self.avg_steps());

        for (map, stats) in &self.map_stats {
            let rounds = stats.rounds.max(1) as f32;
            tracing::info!(
                "  {}: {} rounds, {:.1}% TaskForce wins, avg_reward={:.2}",
                map,
                stats.rounds,
                stats.task_force_wins as f32 / rounds * 100.0,
                stats.total_reward / rounds
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moving_average() {
        let mut avg = MovingAverage::new(3);

        avg.push(1.0);
        assert!((avg.average() - 1.0).abs() < 1e-6);

        avg.push(2.0);
        assert!((avg.average() - 1.5).abs() < 1e-6);

        avg.push(3.0);
        assert!((avg.average() - 2.0).abs() < 1e-6);

        avg.push(4.0); // Pushes out 1.0
        assert!((avg.average() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_training_metrics_counts() {
        let mut metrics = TrainingMetrics::new(10);
        metrics.record_episode(4.0, 120, true);
        metrics.record_episode(-2.0, 80, false);
        metrics.record_losses(0.1, 0.5, 1.2);

        assert_eq!(metrics.episodes_logged, 2);
        assert_eq!(metrics.steps_logged, 200);
        assert_eq!(metrics.passes_logged, 1);
        assert!((metrics.win_rate.average() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_scalar_log_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ScalarLog::new(dir.path().join("logs")).unwrap();
        log.log_scalar("episode/reward", 1.5, 1).unwrap();
        log.log_scalar("episode/reward", 2.5, 2).unwrap();

        let csv = std::fs::read_to_string(log.log_dir().join("episode_reward.csv")).unwrap();
        assert_eq!(csv, "step,value\n1,1.5\n2,2.5\n");
    }

    #[test]
    fn test_evaluation_metrics() {
        let mut metrics = EvaluationMetrics::new();

        metrics.record_round("warehouse", RoundResult::TaskForce, 10.0, 50);
        metrics.record_round("courtyard", RoundResult::Draw, 5.0, 100);

        assert_eq!(metrics.num_rounds, 2);
        assert!((metrics.avg_reward() - 7.5).abs() < 1e-6);
        assert!((metrics.win_rate() - 0.5).abs() < 1e-6);
        assert_eq!(metrics.map_stats["courtyard"].draws, 1);
    }
}
