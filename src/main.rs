use std::path::PathBuf;

use burn::backend::{Autodiff, NdArray};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use squadlab::policy::{Policy, PolicyKind};
use squadlab::rl::persist::NetworkKind;
use squadlab::rl::{
    DirectoryStore, ModelIo, ScalarLog, TrainSchedule, Trainer, TrainerConfig, export_document,
};
use squadlab::state::{Arena, ArenaMap};
use squadlab::training::{EvalConfig, EvaluationRunner, Orchestrator, OrchestratorConfig, StepStatus};

type TrainBackend = Autodiff<NdArray>;
type InferBackend = NdArray;

#[derive(Parser)]
#[command(name = "squadlab", about = "Train and evaluate squad combat agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train both teams with a shared PPO policy
    Train(TrainArgs),
    /// Play a trained policy (TaskForce) against the scripted one (OpFor)
    Evaluate(EvalArgs),
}

#[derive(clap::Args)]
struct TrainArgs {
    /// Number of rounds to play
    #[arg(long, env = "SQUADLAB_ROUNDS", default_value_t = 100)]
    rounds: usize,

    /// Map to play on; unknown maps use procedural spawns
    #[arg(long, env = "SQUADLAB_MAP", default_value = "warehouse")]
    map: String,

    /// Step cap per round
    #[arg(long, env = "SQUADLAB_MAX_STEPS")]
    max_steps: Option<usize>,

    #[arg(long, env = "SQUADLAB_BOTS_PER_TEAM", default_value_t = 3)]
    bots_per_team: usize,

    /// Round time limit in seconds
    #[arg(long, env = "SQUADLAB_ROUND_TIME", default_value_t = 60.0)]
    round_time: f32,

    /// Simulation step in seconds
    #[arg(long, env = "SQUADLAB_DT", default_value_t = 0.1)]
    dt: f32,

    #[arg(long, env = "SQUADLAB_MODEL_NAME", default_value = "squadlab")]
    model_name: String,

    /// Directory holding saved model blobs
    #[arg(long, env = "SQUADLAB_STORE_DIR", default_value = "models")]
    store_dir: PathBuf,

    /// Start from an exported model document instead of the store
    #[arg(long, env = "SQUADLAB_IMPORT")]
    import: Option<PathBuf>,

    /// Write the final model as a single document
    #[arg(long, env = "SQUADLAB_EXPORT")]
    export: Option<PathBuf>,

    /// Also write burn binary checkpoints to this directory
    #[arg(long, env = "SQUADLAB_CHECKPOINT_DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Save every N rounds (0 disables periodic saves)
    #[arg(long, env = "SQUADLAB_SAVE_EVERY", default_value_t = 10)]
    save_every: usize,

    /// Run training passes on a worker thread
    #[arg(long, env = "SQUADLAB_BACKGROUND")]
    background: bool,

    /// Write per-round scalar CSV logs here
    #[arg(long, env = "SQUADLAB_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[arg(long, env = "SQUADLAB_SEED", default_value_t = 42)]
    seed: u64,
}

#[derive(clap::Args)]
struct EvalArgs {
    /// Exported model document to evaluate
    #[arg(long, env = "SQUADLAB_MODEL")]
    model: PathBuf,

    /// Rounds per map
    #[arg(long, env = "SQUADLAB_ROUNDS", default_value_t = 20)]
    rounds: usize,

    /// Maps to evaluate on
    #[arg(long, env = "SQUADLAB_MAP", value_delimiter = ',', default_value = "warehouse,courtyard")]
    map: Vec<String>,

    #[arg(long, env = "SQUADLAB_MAX_STEPS", default_value_t = 1000)]
    max_steps: usize,

    #[arg(long, env = "SQUADLAB_BOTS_PER_TEAM", default_value_t = 3)]
    bots_per_team: usize,

    #[arg(long, env = "SQUADLAB_SEED", default_value_t = 42)]
    seed: u64,
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("squadlab=info,warn"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

async fn train(args: TrainArgs) -> Result<(), Box<dyn std::error::Error>> {
    let trainer = Trainer::<TrainBackend>::new(
        Default::default(),
        TrainerConfig {
            schedule: if args.background {
                TrainSchedule::Background
            } else {
                TrainSchedule::Inline
            },
            seed: args.seed,
            ..TrainerConfig::default()
        },
    );

    let (io, io_handle) = ModelIo::spawn(DirectoryStore::new(&args.store_dir));
    let config = OrchestratorConfig {
        total_rounds: args.rounds,
        bots_per_team: args.bots_per_team,
        round_time_limit: args.round_time,
        max_steps_per_round: args.max_steps,
        save_every: args.save_every,
        model_name: args.model_name.clone(),
        ..OrchestratorConfig::default()
    };
    let mut orchestrator = Orchestrator::new(config, trainer).with_model_io(io.clone());

    if let Some(path) = &args.import {
        orchestrator.import(path);
    } else {
        let keys = io.keys().await.unwrap_or_default();
        if keys.contains(&NetworkKind::Policy.key(&args.model_name)) {
            orchestrator.restore(&args.model_name).await;
        } else {
            info!("No saved model '{}', starting fresh", args.model_name);
        }
    }

    let mut scalars = match &args.log_dir {
        Some(dir) => Some(ScalarLog::new(dir)?),
        None => None,
    };

    info!(
        "Training for {} rounds on '{}' ({} bots per team)",
        args.rounds, args.map, args.bots_per_team
    );
    let mut world = Arena::new(ArenaMap::by_name(&args.map), args.seed);
    loop {
        match orchestrator.step(&mut world, args.dt) {
            StepStatus::Running => world.step(args.dt),
            StepStatus::RoundEnded(summary) => {
                info!(
                    "Episode {}: steps={}, reward={:.2}",
                    summary.round, summary.steps, summary.episode_reward
                );
                if let Some(log) = scalars.as_mut() {
                    if let Err(e) = log.log_metrics(orchestrator.metrics(), summary.round) {
                        warn!("Scalar logging failed: {}", e);
                    }
                }
                if summary.round % 10 == 0 {
                    orchestrator.metrics().log_to_console();
                }
            }
            StepStatus::Finished => break,
        }
    }

    let failed = orchestrator.flush_saves().await;
    if failed > 0 {
        warn!("{} model saves failed", failed);
    }

    if let Some(path) = &args.export {
        export_document(path, &orchestrator.trainer().snapshot(&args.model_name)?)?;
        info!("Exported model to {}", path.display());
    }
    if let Some(dir) = &args.checkpoint_dir {
        orchestrator.trainer().save_checkpoint(dir)?;
        info!("Wrote checkpoint to {}", dir.display());
    }

    let stats = orchestrator.stats();
    let metrics = orchestrator.metrics();
    info!("=== Training Summary ===");
    info!("Total episodes: {}", stats.episode_count);
    info!("Total steps: {}", orchestrator.total_steps());
    info!("Average reward: {:.2}", stats.avg_reward);
    info!("Training passes: {}", stats.training_steps);
    info!(
        "Logged: {} episodes, {} steps, {} passes",
        metrics.episodes_logged, metrics.steps_logged, metrics.passes_logged
    );

    drop(orchestrator);
    drop(io);
    io_handle.await?;
    Ok(())
}

fn evaluate(args: EvalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let device = Default::default();
    let mut neural = Policy::<InferBackend>::new(&PolicyKind::Neural, &device);
    neural.load(&args.model)?;
    let scripted = Policy::new(&PolicyKind::Scripted { seed: args.seed }, &device);

    let config = EvalConfig {
        bots_per_team: args.bots_per_team,
        max_steps_per_round: args.max_steps,
        ..EvalConfig::default()
    };
    let mut runner = EvaluationRunner::new(config, neural, scripted)?;
    info!(
        "Evaluating {} against scripted on {:?}, {} rounds each",
        args.model.display(),
        args.map,
        args.rounds
    );
    runner.evaluate(&args.map, args.rounds, args.seed).print_summary();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();

    match Cli::parse().command {
        Command::Train(args) => train(args).await,
        Command::Evaluate(args) => evaluate(args),
    }
}
