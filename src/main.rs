use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use neural_vmc::training::{run, RunConfig, RunOptions, StopSignal};

#[derive(Parser, Debug)]
#[command(version, about = "Variational Monte Carlo with a neural-network wavefunction", long_about = None)]
struct Args {
    /// YAML run configuration
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    /// Continue from the latest checkpoint in the checkpoint directory
    #[arg(long)]
    resume: bool,

    /// Override the number of training iterations
    #[arg(long)]
    steps: Option<u64>,

    /// Override the number of evaluation steps after training
    #[arg(long)]
    eval_steps: Option<usize>,
}

const HA_TO_EV: f64 = 27.21138602;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = RunConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    // Ctrl-C finishes the current iteration and checkpoints before exiting
    let stop = StopSignal::new();
    let handler = stop.clone();
    ctrlc::set_handler(move || {
        if handler.raise() {
            tracing::warn!("interrupt received, stopping after the current iteration");
        }
    })
    .context("failed to set the Ctrl-C handler")?;

    let options = RunOptions {
        resume: args.resume,
        steps: args.steps,
        eval_steps: args.eval_steps,
        stop,
    };

    let summary = run(&config, &options)?;

    println!("VMC Training Results");
    println!("--------------------");
    println!("Parameters: {}", summary.n_params);
    println!("Iterations: {}", summary.steps);
    if let Some(eval) = summary.evaluation {
        println!(
            "Energy: {:.6} ± {:.6} Ha ({:.4} ± {:.4} eV)",
            eval.energy.mean,
            eval.energy.error,
            HA_TO_EV * eval.energy.mean,
            HA_TO_EV * eval.energy.error
        );
        println!("Autocorrelation time: {:.2} steps", eval.energy.autocorrelation_time);
        println!("Acceptance: {:.3}", eval.acceptance);
    }
    if let Some(path) = summary.checkpoint {
        println!("Checkpoint: {}", path.display());
    }
    Ok(())
}
