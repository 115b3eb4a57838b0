use crate::grid::Coord;
use crate::rng::RandomSource;
use crate::state::LatticeState;
use tumor_sim_common::{RecruitmentPolicy, SimParams};

/// Adds immune cells to approach a target population.
#[derive(Debug, Clone)]
pub struct RecruitmentEngine {
    policy: RecruitmentPolicy,
    target_count: f32,
    uniform_probability: f32,
}

impl RecruitmentEngine {
    pub fn new(policy: RecruitmentPolicy, params: &SimParams) -> Self {
        RecruitmentEngine {
            policy,
            target_count: params.target_immune_count,
            uniform_probability: params.uniform_recruit_probability,
        }
    }

    pub fn policy(&self) -> RecruitmentPolicy {
        self.policy
    }

    /// Runs one recruitment round and returns how many cells were added.
    /// Occupied sites are never overwritten.
    pub fn recruit(&self, state: &mut LatticeState, vessels: &[Coord], rng: &mut RandomSource) -> u32 {
        match self.policy {
            RecruitmentPolicy::Vessels => self.at_vessels(state, vessels, rng),
            RecruitmentPolicy::Uniform => self.uniformly(state, rng),
            RecruitmentPolicy::None => 0,
        }
    }

    /// Each vessel draws once with probability
    /// `(target - current) / vessel_count`, using the live immune count.
    fn at_vessels(&self, state: &mut LatticeState, vessels: &[Coord], rng: &mut RandomSource) -> u32 {
        if vessels.is_empty() {
            return 0;
        }
        let current = state.immune_count() as f32;
        let threshold = (self.target_count - current) / vessels.len() as f32;
        if threshold <= 0.0 {
            return 0;
        }
        let mut added = 0;
        for &v in vessels {
            if rng.uniform() <= threshold && state.place_immune(v) {
                added += 1;
            }
        }
        added
    }

    /// Every immune-free site draws with a fixed probability.
    fn uniformly(&self, state: &mut LatticeState, rng: &mut RandomSource) -> u32 {
        if self.uniform_probability <= 0.0 {
            return 0;
        }
        let mut added = 0;
        for idx in 0..state.immune.len() {
            let c = state.immune.coord_of(idx);
            if state.immune[c].is_present() {
                continue;
            }
            if rng.chance(self.uniform_probability) && state.place_immune(c) {
                added += 1;
            }
        }
        added
    }
}
