use anyhow::Result;
use clap::Parser;
use log::{debug, error, info, trace};
use std::path::PathBuf;
use std::time::Instant;
use tumor_sim::{RunRecorder, TumorSimulation};
use tumor_sim_common::SimulationConfig;

/// Command-line arguments for the simulation driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Simulation config file (TOML)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// RNG seed; overrides the one in the config file
    #[arg(long)]
    seed: Option<u64>,

    /// Number of ticks to run; overrides the value derived from the timing section
    #[arg(long)]
    steps: Option<u32>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Starting tumor simulation...");
    let config = SimulationConfig::load(&args.config)?;
    info!("Loaded configuration from {}", args.config.display());
    info!("Using {} Rayon threads.", rayon::current_num_threads());

    let mut sim = match args.seed {
        Some(seed) => TumorSimulation::with_seed(&config, seed)?,
        None => TumorSimulation::new(&config)?,
    };
    let params = sim.params().clone();
    let total_steps = args.steps.unwrap_or(params.total_steps);
    let log_step = params.log_step;
    let stop_when_cleared = config.timing.stop_when_cleared;

    let mut recorder = RunRecorder::new(&sim, total_steps);
    debug!(
        "Recording run with seed {} for {} ticks.",
        recorder.header().seed,
        recorder.header().total_steps
    );
    recorder.record_counts(&sim);
    recorder.record_snapshot(&sim);

    info!(
        "Running {} ticks of {:.1} min, snapshot every {} ticks.",
        total_steps, params.dt_minutes, log_step
    );
    let start_time = Instant::now();

    for step in 1..=total_steps {
        let step_start = Instant::now();
        let summary = sim.step();
        trace!("Tick {} completed in {:.2} ms", step, step_start.elapsed().as_secs_f64() * 1000.0);

        recorder.record_counts(&sim);
        let cleared = sim.is_tumor_cleared();
        let is_last = step == total_steps || (stop_when_cleared && cleared);
        if step % log_step == 0 || is_last {
            recorder.record_snapshot(&sim);
            info!(
                "Tick [{}/{}] ({:.1} h) | healthy {} | tumor {} | dead {} | immune {} | elapsed {:.2} s",
                step,
                total_steps,
                sim.time_minutes() / 60.0,
                summary.counts.healthy,
                summary.counts.tumor,
                summary.counts.dead_tumor,
                summary.counts.immune,
                start_time.elapsed().as_secs_f64()
            );
        }
        if stop_when_cleared && cleared {
            info!("Tumor cleared at tick {}; stopping early.", step);
            break;
        }
    }

    let total = start_time.elapsed();
    info!(
        "Simulation finished in {:.3} seconds ({} ticks).",
        total.as_secs_f64(),
        sim.tick()
    );
    debug!("Final counts: {:?}", sim.counts());

    info!("Saving recorded data...");
    match recorder.write() {
        Ok(files) if files.is_empty() => info!("Output disabled in config; nothing written."),
        Ok(files) => debug!("Wrote {} output files.", files.len()),
        Err(e) => error!("Error writing output: {:#}", e),
    }
    Ok(())
}
