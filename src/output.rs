use crate::simulation::TumorSimulation;
use anyhow::{Context, Result};
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tumor_sim_common::{CountsRecord, LatticeSnapshot, OutputConfig, OutputFormat, RunHeader, RunRecord};

/// Collects snapshots and the population time series during a run and writes
/// them out at the end.
#[derive(Debug)]
pub struct RunRecorder {
    output: OutputConfig,
    header: RunHeader,
    snapshots: Vec<LatticeSnapshot>,
    counts: Vec<CountsRecord>,
}

impl RunRecorder {
    pub fn new(sim: &TumorSimulation, total_steps: u32) -> Self {
        RunRecorder {
            output: sim.config().output.clone(),
            header: RunHeader {
                seed: sim.seed(),
                total_steps,
                config: sim.config().clone(),
            },
            snapshots: Vec::new(),
            counts: Vec::new(),
        }
    }

    pub fn record_counts(&mut self, sim: &TumorSimulation) {
        self.counts
            .push(CountsRecord::new(sim.tick(), sim.time_minutes(), sim.counts()));
    }

    /// Stores a snapshot unless one was already taken at this tick.
    pub fn record_snapshot(&mut self, sim: &TumorSimulation) {
        if self.snapshots.last().is_some_and(|s| s.tick == sim.tick()) {
            return;
        }
        self.snapshots.push(sim.snapshot());
    }

    pub fn header(&self) -> &RunHeader {
        &self.header
    }

    pub fn snapshots(&self) -> &[LatticeSnapshot] {
        &self.snapshots
    }

    pub fn counts(&self) -> &[CountsRecord] {
        &self.counts
    }

    /// Writes every enabled output next to the configured base filename and
    /// returns the files written.
    pub fn write(&self) -> Result<Vec<PathBuf>> {
        self.write_with_base(Path::new(&self.output.base_filename))
    }

    /// Same as [`write`](Self::write) with an explicit base path, e.g.
    /// `out/run` gives `out/run_snapshots.json` and `out/run_counts.csv`.
    pub fn write_with_base(&self, base: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        if self.output.save_snapshots {
            let path = with_suffix(base, snapshot_suffix(self.output.format));
            self.write_snapshots(&path)?;
            info!("{} snapshots saved to {}", self.snapshots.len(), path.display());
            written.push(path);
        }
        if self.output.save_counts {
            let path = with_suffix(base, "_counts.csv");
            self.write_counts(&path)?;
            info!("{} count rows saved to {}", self.counts.len(), path.display());
            written.push(path);
        }
        Ok(written)
    }

    fn write_snapshots(&self, path: &Path) -> Result<()> {
        let record = RunRecord {
            header: self.header.clone(),
            snapshots: self.snapshots.clone(),
        };
        let file = File::create(path).with_context(|| format!("creating snapshot file '{}'", path.display()))?;
        let mut writer = BufWriter::new(file);
        match self.output.format {
            OutputFormat::Json => serde_json::to_writer(&mut writer, &record)
                .with_context(|| format!("serializing snapshots to JSON in '{}'", path.display()))?,
            OutputFormat::Bincode => bincode::serialize_into(&mut writer, &record)
                .with_context(|| format!("serializing snapshots to bincode in '{}'", path.display()))?,
            OutputFormat::MessagePack => rmp_serde::encode::write(&mut writer, &record)
                .with_context(|| format!("serializing snapshots to MessagePack in '{}'", path.display()))?,
        }
        writer.flush()?;
        Ok(())
    }

    fn write_counts(&self, path: &Path) -> Result<()> {
        let mut writer =
            csv::Writer::from_path(path).with_context(|| format!("creating counts file '{}'", path.display()))?;
        for row in &self.counts {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn snapshot_suffix(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Json => "_snapshots.json",
        OutputFormat::Bincode => "_snapshots.bin",
        OutputFormat::MessagePack => "_snapshots.msgpack",
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
