use crate::diffusion::{DiffusionSolver, FieldReport, FieldSpec};
use crate::grid::{Coord, Grid, Neighborhood};
use crate::lifecycle::{LifecycleEngine, LifecycleRules, LifecycleTally};
use crate::metrics::{count_population, tumor_cleared};
use crate::motility::MotilityEngine;
use crate::recruitment::RecruitmentEngine;
use crate::rng::RandomSource;
use crate::state::{ImmuneState, LatticeState, OptionalLayers, TissueState};
use anyhow::{bail, Result};
use log::{debug, info, warn};
use tumor_sim_common::{
    LatticeSnapshot, PopulationCounts, RecruitmentPolicy, SimParams, SimulationConfig, TissueFill, VesselLayout,
};

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    /// Tick number after the step (the first step returns 1).
    pub tick: u64,
    pub counts: PopulationCounts,
    /// One report per diffusing field, in solve order.
    pub diffusion: Vec<FieldReport>,
    pub lifecycle: LifecycleTally,
    pub moved: u32,
    pub recruited: u32,
}

/// Tumor growth, nutrient diffusion and immune response on a square lattice.
///
/// Owns the lattice, the random source and one engine per rule family, and
/// advances them in a fixed order per tick:
/// diffusion, deaths, motility, recruitment, proliferation, counting.
pub struct TumorSimulation {
    /// The configuration the run was built from.
    config: SimulationConfig,
    /// Values derived once from the configuration (step count, recruitment targets).
    params: SimParams,
    /// Occupancy layers, scalar fields and per-site counters.
    state: LatticeState,
    /// The only source of randomness in the run; every rule draws from it in tick order.
    rng: RandomSource,

    /// Shared by every diffusing field; holds the Laplacian stencil and work buffers.
    solver: DiffusionSolver,
    nutrient_spec: FieldSpec,
    /// Present only when the attractant section is configured.
    attractant_spec: Option<FieldSpec>,
    /// Present only when the toxin section is configured.
    toxin_spec: Option<FieldSpec>,
    lifecycle: LifecycleEngine,
    motility: MotilityEngine,
    recruitment: RecruitmentEngine,

    /// Vessel sites in raster order. Fixed after seeding.
    vessels: Vec<Coord>,
    /// Number of completed ticks.
    tick: u64,
    /// Population counts as of the end of the last tick.
    counts: PopulationCounts,
}

impl TumorSimulation {
    /// Builds and seeds a simulation. Uses the configured seed, or draws one
    /// from the OS when none is set.
    pub fn new(config: &SimulationConfig) -> Result<Self> {
        let rng = match config.initial_conditions.seed {
            Some(seed) => RandomSource::seeded(seed),
            None => {
                let rng = RandomSource::from_entropy();
                info!("No seed configured; drew seed {} from the OS.", rng.seed());
                rng
            }
        };
        Self::with_rng(config, rng)
    }

    /// Builds a simulation with an explicit seed, ignoring the configured one.
    pub fn with_seed(config: &SimulationConfig, seed: u64) -> Result<Self> {
        Self::with_rng(config, RandomSource::seeded(seed))
    }

    fn with_rng(config: &SimulationConfig, mut rng: RandomSource) -> Result<Self> {
        config.validate()?;
        let params = config.get_sim_params();
        let size = config.lattice.size;
        let hood = Neighborhood::new(size, config.lattice.stencil, config.lattice.boundary);
        let layers = OptionalLayers {
            attractant: config.attractant.is_some(),
            toxin: config.toxin.is_some(),
            ecm: config.ecm.is_some(),
        };

        let mut state = LatticeState::new(hood, layers);
        let vessels = seed_lattice(&mut state, config, &mut rng)?;

        let nutrient_spec = FieldSpec::nutrient(&config.nutrient);
        let attractant_spec = config.attractant.as_ref().map(FieldSpec::attractant);
        let toxin_spec = config.toxin.as_ref().map(FieldSpec::toxin);
        state.nutrient.fill(config.initial_conditions.nutrient_level);
        for &v in &vessels {
            state.nutrient[v] = nutrient_spec.pinned_value;
        }

        if vessels.is_empty() && config.immune.recruitment == RecruitmentPolicy::Vessels {
            warn!("Vessel recruitment is configured but the lattice has no vessels; no immune cells will be recruited.");
        }

        let mut sim = TumorSimulation {
            params: params.clone(),
            solver: DiffusionSolver::new(hood.with_stencil(params.diffusion_stencil), &config.diffusion),
            nutrient_spec,
            attractant_spec,
            toxin_spec,
            lifecycle: LifecycleEngine::new(LifecycleRules::from_config(config)),
            motility: MotilityEngine::new(config.immune.motility, config.immune.noise, &hood),
            recruitment: RecruitmentEngine::new(config.immune.recruitment, &params),
            config: config.clone(),
            state,
            rng,
            vessels,
            tick: 0,
            counts: PopulationCounts::default(),
        };
        if config.initial_conditions.prime_fields {
            let reports = sim.diffuse();
            debug!("Primed fields: {:?}", reports);
        }
        sim.counts = count_population(&sim.state);

        info!(
            "Initialized {}x{} {} lattice with {}-site neighbourhoods (seed {}): {} healthy, {} tumor, {} immune, {} vessel sites.",
            size,
            size,
            hood.boundary().as_str(),
            hood.stencil().neighbor_count(),
            sim.rng.seed(),
            sim.counts.healthy,
            sim.counts.tumor,
            sim.counts.immune,
            sim.vessels.len()
        );
        debug!(
            "Rules: {} solver on a {}-site Laplacian, {} motility, {} recruitment.",
            config.diffusion.solver.as_str(),
            sim.solver.neighborhood().stencil().neighbor_count(),
            sim.motility.mode().as_str(),
            sim.recruitment.policy().as_str()
        );
        debug!("Simulation parameters: {:#?}", sim.params);
        Ok(sim)
    }

    /// Advances the simulation by exactly one tick.
    pub fn step(&mut self) -> TickSummary {
        // --- 1. Relax the scalar fields against the current occupancy ---
        let diffusion = self.diffuse();

        // --- 2. Deaths: ECM damage, then tumor, immune and healthy passes ---
        let mut lifecycle = self.lifecycle.apply_deaths(&mut self.state, &mut self.rng);

        // --- 3. Immune motility (shuffled, one site per cell) ---
        let moved = self.motility.move_all(&mut self.state, &mut self.rng);

        // --- 4. Recruitment, counted against the post-motility population ---
        let recruited = self.recruitment.recruit(&mut self.state, &self.vessels, &mut self.rng);

        // --- 5. Tumor proliferation (shuffled) ---
        let (divisions, blocked) = self.lifecycle.proliferate(&mut self.state, &mut self.rng);
        lifecycle.divisions = divisions;
        lifecycle.blocked_divisions = blocked;

        // --- 6. Count ---
        self.counts = count_population(&self.state);
        self.tick += 1;

        debug!(
            "Tick {}: healthy {} tumor {} dead {} immune {} | killed {} necrotic {} divided {} moved {} recruited {} | diffusion iterations {:?}",
            self.tick,
            self.counts.healthy,
            self.counts.tumor,
            self.counts.dead_tumor,
            self.counts.immune,
            lifecycle.tumor_killed,
            lifecycle.tumor_necrotic,
            lifecycle.divisions,
            moved,
            recruited,
            diffusion.iter().map(|r| r.iterations).collect::<Vec<_>>()
        );

        TickSummary {
            tick: self.tick,
            counts: self.counts,
            diffusion,
            lifecycle,
            moved,
            recruited,
        }
    }

    /// Relaxes nutrient, then attractant, then toxin.
    fn diffuse(&mut self) -> Vec<FieldReport> {
        let state = &mut self.state;
        let mut reports = Vec::with_capacity(3);
        reports.push(
            self.solver
                .relax(&mut state.nutrient, &self.nutrient_spec, &state.tissue, &state.immune),
        );
        if let (Some(spec), Some(field)) = (&self.attractant_spec, state.attractant.as_mut()) {
            reports.push(self.solver.relax(field, spec, &state.tissue, &state.immune));
        }
        if let (Some(spec), Some(field)) = (&self.toxin_spec, state.toxin.as_mut()) {
            reports.push(self.solver.relax(field, spec, &state.tissue, &state.immune));
        }
        reports
    }

    // --- Read-only views ---

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    /// Ticks completed so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn time_minutes(&self) -> f32 {
        self.tick as f32 * self.params.dt_minutes
    }

    /// Population after the most recent tick (or after seeding).
    pub fn counts(&self) -> PopulationCounts {
        self.counts
    }

    pub fn is_tumor_cleared(&self) -> bool {
        tumor_cleared(&self.counts)
    }

    pub fn state(&self) -> &LatticeState {
        &self.state
    }

    pub fn tissue(&self) -> &Grid<TissueState> {
        &self.state.tissue
    }

    pub fn immune(&self) -> &Grid<ImmuneState> {
        &self.state.immune
    }

    pub fn nutrient(&self) -> &Grid<f32> {
        &self.state.nutrient
    }

    pub fn attractant(&self) -> Option<&Grid<f32>> {
        self.state.attractant.as_ref()
    }

    pub fn toxin(&self) -> Option<&Grid<f32>> {
        self.state.toxin.as_ref()
    }

    pub fn ecm_stress(&self) -> Option<&Grid<f32>> {
        self.state.ecm_stress.as_ref()
    }

    pub fn proliferation_timers(&self) -> &Grid<u32> {
        &self.state.prolif_timer
    }

    pub fn kill_counts(&self) -> &Grid<u32> {
        &self.state.kill_count
    }

    pub fn lifespans(&self) -> &Grid<u32> {
        &self.state.lifespan
    }

    pub fn vessels(&self) -> &[Coord] {
        &self.vessels
    }

    /// Copies the current lattice into a serializable snapshot.
    pub fn snapshot(&self) -> LatticeSnapshot {
        let copy = |g: &Grid<f32>| g.as_slice().to_vec();
        LatticeSnapshot {
            tick: self.tick,
            time_minutes: self.time_minutes(),
            size: self.state.size(),
            tissue: self.state.tissue.as_slice().iter().map(|t| t.code()).collect(),
            immune: self.state.immune.as_slice().iter().map(|i| i.code()).collect(),
            nutrient: copy(&self.state.nutrient),
            attractant: self.state.attractant.as_ref().map(copy),
            toxin: self.state.toxin.as_ref().map(copy),
            ecm_stress: self.state.ecm_stress.as_ref().map(copy),
            counts: self.counts,
        }
    }
}

/// Fills tissue, vessels, tumor foci and immune cells. Returns the vessel
/// sites in raster order.
fn seed_lattice(state: &mut LatticeState, config: &SimulationConfig, rng: &mut RandomSource) -> Result<Vec<Coord>> {
    let ic = &config.initial_conditions;
    let size = state.size();

    let fill = match ic.tissue_fill {
        TissueFill::Healthy => TissueState::Healthy,
        TissueFill::Empty => TissueState::Empty,
    };
    state.tissue.fill(fill);

    match ic.vessel_layout {
        VesselLayout::BoundaryRows => {
            for col in 0..size {
                state.seed_tissue(Coord::new(0, col), TissueState::Vessel);
                state.seed_tissue(Coord::new(size - 1, col), TissueState::Vessel);
            }
        }
        VesselLayout::Random => {
            for idx in 0..state.tissue.len() {
                if rng.chance(ic.vessel_density) {
                    let c = state.tissue.coord_of(idx);
                    state.seed_tissue(c, TissueState::Vessel);
                }
            }
        }
        VesselLayout::Explicit => {
            for &(row, col) in &ic.vessel_sites {
                state.seed_tissue(Coord::new(row, col), TissueState::Vessel);
            }
        }
    }

    let radius = ic.tumor_focus_radius;
    for &(row, col) in &ic.tumor_seeds {
        let centre = Coord::new(row, col);
        if state.tissue[centre] == TissueState::Vessel {
            bail!("tumor seed ({}, {}) lies on a vessel site", row, col);
        }
        let r = radius as isize;
        for dr in -r..=r {
            for dc in -r..=r {
                if dr * dr + dc * dc > r * r {
                    continue;
                }
                let (nr, nc) = (row as isize + dr, col as isize + dc);
                if nr < 0 || nc < 0 || nr >= size as isize || nc >= size as isize {
                    continue;
                }
                let c = Coord::new(nr as usize, nc as usize);
                if state.tissue[c] != TissueState::Vessel {
                    state.seed_tissue(c, TissueState::Tumor);
                }
            }
        }
    }

    for idx in 0..state.immune.len() {
        if rng.chance(ic.immune_ratio) {
            let c = state.immune.coord_of(idx);
            state.place_immune(c);
        }
    }

    Ok(state.tissue_sites(TissueState::Vessel))
}
