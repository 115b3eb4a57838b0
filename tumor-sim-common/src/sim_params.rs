use crate::config::Stencil;
use serde::{Deserialize, Serialize};

/// Parameters derived from the configuration once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // Lattice
    pub lattice_size: usize,
    pub num_sites: usize,
    pub diffusion_stencil: Stencil,

    // Time
    pub dt_minutes: f32,
    pub total_steps: u32,
    pub log_step: u32,

    // Recruitment
    pub target_immune_count: f32, // target_ratio * num_sites
    pub uniform_recruit_probability: f32, // per empty site per tick, target_ratio / life_limit
}
