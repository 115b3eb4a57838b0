use crate::config::SimulationConfig;
use serde::{Deserialize, Serialize};

/// Live cell counts after a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationCounts {
    pub healthy: u32,
    pub tumor: u32,
    pub dead_tumor: u32,
    pub immune: u32,
}

/// Full copy of the lattice at the end of a tick.
///
/// Layers are row-major, `size * size` long. Tissue codes: Empty 0, Healthy 10,
/// Tumor 20, DeadTumor 30, Vessel 50. Immune codes: Empty 0, Immune 40.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatticeSnapshot {
    pub tick: u64,
    pub time_minutes: f32,
    pub size: usize,
    pub tissue: Vec<u8>,
    pub immune: Vec<u8>,
    pub nutrient: Vec<f32>,
    pub attractant: Option<Vec<f32>>,
    pub toxin: Option<Vec<f32>>,
    pub ecm_stress: Option<Vec<f32>>,
    pub counts: PopulationCounts,
}

/// One row of the population time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountsRecord {
    pub tick: u64,
    pub time_minutes: f32,
    pub healthy: u32,
    pub tumor: u32,
    pub dead_tumor: u32,
    pub immune: u32,
}

impl CountsRecord {
    pub fn new(tick: u64, time_minutes: f32, counts: PopulationCounts) -> Self {
        CountsRecord {
            tick,
            time_minutes,
            healthy: counts.healthy,
            tumor: counts.tumor,
            dead_tumor: counts.dead_tumor,
            immune: counts.immune,
        }
    }
}

/// Parameter header written once at the top of a run file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHeader {
    pub seed: u64,
    pub total_steps: u32,
    pub config: SimulationConfig,
}

/// Everything written to the snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub header: RunHeader,
    pub snapshots: Vec<LatticeSnapshot>,
}
