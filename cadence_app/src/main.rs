//! Demo pipeline: three synthetic stages under the cadence sequencer.
//!
//! Stands in for the original camera/vision pipeline — frame
//! sampling, analysis, housekeeping — with deterministic synthetic
//! loads so the scheduling and telemetry behavior can be observed on
//! any machine. Pass a TOML config path as the only argument, or run
//! with the built-in 30 Hz default.

use std::hint::black_box;
use std::path::Path;

use anyhow::Context;
use log::info;

use cadence_core::{priority_table, Sequencer, SequencerConfig, WorkStatus, WorkUnit};

const DEFAULT_CONFIG: &str = r#"
period_ns = 33_333_333          # 30 Hz base rate
cycle_budget = 900              # ~30 seconds
telemetry_capacity = 10_000
telemetry_sink = "results.csv"

[[task]]
name = "frame_sampler"
divisor = 3                     # 10 Hz

[[task]]
name = "analyzer"
divisor = 4                     # 7.5 Hz

[[task]]
name = "housekeeper"
divisor = 5                     # 6 Hz
"#;

/// Deterministic busy load standing in for one pipeline stage.
struct SyntheticLoad {
    name: String,
    iterations: u64,
}

impl SyntheticLoad {
    fn new(name: &str, iterations: u64) -> Box<dyn WorkUnit> {
        Box::new(Self {
            name: name.to_string(),
            iterations,
        })
    }
}

impl WorkUnit for SyntheticLoad {
    fn name(&self) -> &str {
        &self.name
    }

    fn perform(&mut self) -> WorkStatus {
        let mut acc: u64 = 0;
        for i in 0..self.iterations {
            acc = acc.wrapping_add(i.wrapping_mul(i));
        }
        black_box(acc);
        WorkStatus::Continue
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => SequencerConfig::from_path(Path::new(&path))
            .with_context(|| format!("loading config from {}", path))?,
        None => SequencerConfig::from_toml_str(DEFAULT_CONFIG)
            .context("parsing built-in default config")?,
    };

    println!("=== Cadence demo pipeline ===");
    println!(
        "base period {:?}, {} cycles, telemetry -> {}",
        config.base_period(),
        config.cycle_budget,
        config.telemetry_sink.display()
    );
    for descriptor in priority_table(&config).context("deriving task priorities")? {
        println!(
            "  task {} '{}': divisor {}, FIFO priority {}",
            descriptor.id, descriptor.name, descriptor.divisor, descriptor.priority
        );
    }
    println!("Ctrl-C stops the run early; telemetry is still flushed.");

    let works: Vec<Box<dyn WorkUnit>> = config
        .tasks
        .iter()
        .map(|task| SyntheticLoad::new(&task.name, 200_000))
        .collect();

    let sequencer = Sequencer::new(config, works).context("constructing sequencer")?;

    let stop = sequencer.stop_handle();
    ctrlc::set_handler(move || {
        eprintln!("\nCtrl-C received, shutting down...");
        stop.stop();
    })
    .context("installing Ctrl-C handler")?;

    let outcome = sequencer.run().context("sequencer run failed")?;

    info!("run complete: {:?}", outcome);
    println!("\n=== Run complete ===");
    println!("cycles:            {}", outcome.cycles);
    println!("releases per task: {:?}", outcome.releases);
    println!("sleep retries:     {}", outcome.sleep_retries);
    println!("records exported:  {}", outcome.records_exported);
    if !outcome.realtime_installed {
        println!("note: ran under best-effort scheduling (no RT privilege)");
    }
    if outcome.stopped_early {
        println!("note: stopped early by request");
    }

    Ok(())
}
