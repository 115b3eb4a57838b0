use crate::grid::Coord;
use crate::rng::RandomSource;
use crate::state::{LatticeState, TissueState};
use tumor_sim_common::{BlockedDivision, EcmConfig, NecrosisOutcome, SimulationConfig};

/// Thresholds and limits of the per-site state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleRules {
    pub nutrient_survival: f32,
    pub proliferation_threshold: f32,
    pub cycle_length: u32,
    pub blocked_division: BlockedDivision,
    pub necrosis: NecrosisOutcome,
    pub kill_limit: u32,
    pub life_limit: u32,
    pub immune_survival: f32,
    /// Attractant added at a site each time an immune cell kills there.
    pub kill_boost: Option<f32>,
    /// Healthy cells die once the local toxin reaches this value.
    pub toxin_threshold: Option<f32>,
    pub ecm: Option<EcmConfig>,
}

impl LifecycleRules {
    pub fn from_config(config: &SimulationConfig) -> Self {
        LifecycleRules {
            nutrient_survival: config.nutrient.survival_threshold,
            proliferation_threshold: config.nutrient.proliferation_threshold,
            cycle_length: config.tumor.cycle_length.max(1),
            blocked_division: config.tumor.blocked_division,
            necrosis: config.tumor.necrosis,
            kill_limit: config.immune.kill_limit,
            life_limit: config.immune.life_limit,
            immune_survival: config.immune.survival_threshold,
            kill_boost: config.attractant.as_ref().map(|a| a.kill_boost),
            toxin_threshold: config.toxin.as_ref().map(|t| t.threshold),
            ecm: config.ecm.clone(),
        }
    }
}

/// What the lifecycle passes did during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleTally {
    pub ecm_damaged: u32,
    pub tumor_killed: u32,
    pub tumor_necrotic: u32,
    pub immune_died: u32,
    pub healthy_died: u32,
    pub divisions: u32,
    pub blocked_divisions: u32,
}

/// Death, damage and division rules, applied in place to the lattice.
#[derive(Debug)]
pub struct LifecycleEngine {
    rules: LifecycleRules,
    candidates: Vec<Coord>,
}

impl LifecycleEngine {
    pub fn new(rules: LifecycleRules) -> Self {
        LifecycleEngine {
            rules,
            candidates: Vec::with_capacity(8),
        }
    }

    /// ECM damage, then the tumor, immune and healthy death passes, in that order.
    pub fn apply_deaths(&mut self, state: &mut LatticeState, rng: &mut RandomSource) -> LifecycleTally {
        let mut tally = LifecycleTally {
            ecm_damaged: self.damage_ecm(state, rng),
            ..LifecycleTally::default()
        };
        let (killed, necrotic) = self.kill_tumor(state);
        tally.tumor_killed = killed;
        tally.tumor_necrotic = necrotic;
        tally.immune_died = self.kill_immune(state);
        tally.healthy_died = self.kill_healthy(state);
        tally
    }

    /// Each tumor cell stresses one randomly chosen healthy neighbour.
    /// Returns the number of sites damaged. No-op without an ECM layer.
    pub fn damage_ecm(&mut self, state: &mut LatticeState, rng: &mut RandomSource) -> u32 {
        let Some(rate) = self.rules.ecm.as_ref().map(|e| e.damage_rate) else {
            return 0;
        };
        let mut damaged = 0;
        for c in state.tissue_sites(TissueState::Tumor) {
            let tissue = &state.tissue;
            state
                .hood
                .collect_where(c, &mut self.candidates, |n| tissue[n] == TissueState::Healthy);
            if let (Some(target), Some(ecm)) = (rng.pick(&self.candidates), state.ecm_stress.as_mut()) {
                ecm[target] += rate;
                damaged += 1;
            }
        }
        damaged
    }

    /// Tumor cells sharing a site with an immune cell are killed; the rest
    /// starve when nutrient falls below the survival threshold.
    /// Returns `(killed, necrotic)`.
    pub fn kill_tumor(&self, state: &mut LatticeState) -> (u32, u32) {
        let (mut killed, mut necrotic) = (0, 0);
        for idx in 0..state.tissue.len() {
            let c = state.tissue.coord_of(idx);
            if state.tissue[c] != TissueState::Tumor {
                continue;
            }
            if state.immune[c].is_present() {
                state.tumor_apoptosis(c);
                state.kill_count[c] += 1;
                if let (Some(boost), Some(attractant)) = (self.rules.kill_boost, state.attractant.as_mut()) {
                    attractant[c] += boost;
                }
                killed += 1;
            } else if state.nutrient[c] < self.rules.nutrient_survival {
                state.tumor_necrosis(c, self.rules.necrosis);
                necrotic += 1;
            }
        }
        (killed, necrotic)
    }

    /// Ages every immune cell by one tick and removes the exhausted, the old
    /// and the starved.
    pub fn kill_immune(&self, state: &mut LatticeState) -> u32 {
        let mut died = 0;
        for c in state.immune_sites() {
            state.lifespan[c] += 1;
            let exhausted = state.kill_count[c] >= self.rules.kill_limit;
            let expired = state.lifespan[c] >= self.rules.life_limit;
            let starved = state.nutrient[c] < self.rules.immune_survival;
            if exhausted || expired || starved {
                state.immune_dies(c);
                died += 1;
            }
        }
        died
    }

    /// Healthy cells die of starvation, of accumulated ECM stress, or of toxin.
    pub fn kill_healthy(&self, state: &mut LatticeState) -> u32 {
        let mut died = 0;
        for c in state.tissue_sites(TissueState::Healthy) {
            let starved = state.nutrient[c] < self.rules.nutrient_survival;
            let stressed = match (&self.rules.ecm, &state.ecm_stress) {
                (Some(cfg), Some(ecm)) => ecm[c] >= cfg.stress_threshold,
                _ => false,
            };
            let poisoned = match (self.rules.toxin_threshold, &state.toxin) {
                (Some(threshold), Some(toxin)) => toxin[c] >= threshold,
                _ => false,
            };
            if starved || stressed || poisoned {
                state.healthy_dies(c);
                died += 1;
            }
        }
        died
    }

    /// Well-fed tumor cells, visited in shuffled order, advance their cycle
    /// timer and divide into a random empty neighbour once it reaches the cycle
    /// length. Returns `(divisions, blocked)`.
    pub fn proliferate(&mut self, state: &mut LatticeState, rng: &mut RandomSource) -> (u32, u32) {
        let mut growing: Vec<Coord> = state
            .tissue
            .coords()
            .filter(|&c| {
                state.tissue[c] == TissueState::Tumor && state.nutrient[c] > self.rules.proliferation_threshold
            })
            .collect();
        rng.shuffle(&mut growing);

        let (mut divisions, mut blocked) = (0, 0);
        for c in growing {
            state.prolif_timer[c] += 1;
            if state.prolif_timer[c] < self.rules.cycle_length {
                continue;
            }
            let tissue = &state.tissue;
            state
                .hood
                .collect_where(c, &mut self.candidates, |n| tissue[n] == TissueState::Empty);
            match rng.pick(&self.candidates) {
                Some(daughter) => {
                    state.spawn_tumor(daughter);
                    state.prolif_timer[c] = 0;
                    divisions += 1;
                }
                None => {
                    if self.rules.blocked_division == BlockedDivision::Reset {
                        state.prolif_timer[c] = 0;
                    }
                    blocked += 1;
                }
            }
        }
        (divisions, blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Neighborhood;
    use crate::state::{ImmuneState, OptionalLayers};
    use approx::assert_abs_diff_eq;
    use tumor_sim_common::{Boundary, Stencil};

    fn rules() -> LifecycleRules {
        LifecycleRules {
            nutrient_survival: 0.1,
            proliferation_threshold: 0.3,
            cycle_length: 2,
            blocked_division: BlockedDivision::Retry,
            necrosis: NecrosisOutcome::DeadTumor,
            kill_limit: 2,
            life_limit: 10,
            immune_survival: 0.1,
            kill_boost: Some(0.5),
            toxin_threshold: Some(0.8),
            ecm: Some(EcmConfig {
                damage_rate: 0.25,
                stress_threshold: 0.5,
            }),
        }
    }

    fn lattice(fill: TissueState) -> LatticeState {
        let hood = Neighborhood::new(5, Stencil::Four, Boundary::Reflective);
        let mut s = LatticeState::new(hood, OptionalLayers { attractant: true, toxin: true, ecm: true });
        s.tissue.fill(fill);
        s.nutrient.fill(1.0);
        s
    }

    #[test]
    fn immune_cells_kill_co_located_tumor() {
        let engine = LifecycleEngine::new(rules());
        let mut s = lattice(TissueState::Empty);
        let c = Coord::new(2, 2);
        s.seed_tissue(c, TissueState::Tumor);
        s.prolif_timer[c] = 1;
        s.place_immune(c);

        assert_eq!(engine.kill_tumor(&mut s), (1, 0));
        assert_eq!(s.tissue[c], TissueState::Empty);
        assert_eq!(s.prolif_timer[c], 0);
        assert_eq!(s.kill_count[c], 1);
        assert_abs_diff_eq!(s.attractant.as_ref().map_or(0.0, |a| a[c]), 0.5);
    }

    #[test]
    fn starving_tumor_turns_necrotic() {
        let mut s = lattice(TissueState::Empty);
        let a = Coord::new(1, 1);
        s.seed_tissue(a, TissueState::Tumor);
        s.nutrient[a] = 0.05;
        assert_eq!(LifecycleEngine::new(rules()).kill_tumor(&mut s), (0, 1));
        assert_eq!(s.tissue[a], TissueState::DeadTumor);

        let mut s = lattice(TissueState::Empty);
        s.seed_tissue(a, TissueState::Tumor);
        s.nutrient[a] = 0.05;
        let engine = LifecycleEngine::new(LifecycleRules {
            necrosis: NecrosisOutcome::Empty,
            ..rules()
        });
        engine.kill_tumor(&mut s);
        assert_eq!(s.tissue[a], TissueState::Empty);
    }

    #[test]
    fn immune_cells_age_and_die_with_counters_cleared() {
        let engine = LifecycleEngine::new(rules());
        let mut s = lattice(TissueState::Healthy);
        let old = Coord::new(0, 0);
        let tired = Coord::new(0, 1);
        let hungry = Coord::new(0, 2);
        let fine = Coord::new(0, 3);
        for c in [old, tired, hungry, fine] {
            s.place_immune(c);
        }
        s.lifespan[old] = 9;
        s.kill_count[tired] = 2;
        s.nutrient[hungry] = 0.0;
        s.kill_count[fine] = 1;

        assert_eq!(engine.kill_immune(&mut s), 3);
        for c in [old, tired, hungry] {
            assert_eq!(s.immune[c], ImmuneState::Empty);
            assert_eq!((s.kill_count[c], s.lifespan[c]), (0, 0));
        }
        assert_eq!((s.kill_count[fine], s.lifespan[fine]), (1, 1));
    }

    #[test]
    fn healthy_cells_die_from_stress_toxin_or_starvation() {
        let engine = LifecycleEngine::new(rules());
        let mut s = lattice(TissueState::Healthy);
        let stressed = Coord::new(1, 0);
        let poisoned = Coord::new(1, 1);
        let starved = Coord::new(1, 2);
        if let Some(ecm) = s.ecm_stress.as_mut() {
            ecm[stressed] = 0.5;
        }
        if let Some(toxin) = s.toxin.as_mut() {
            toxin[poisoned] = 0.9;
        }
        s.nutrient[starved] = 0.0;

        assert_eq!(engine.kill_healthy(&mut s), 3);
        for c in [stressed, poisoned, starved] {
            assert_eq!(s.tissue[c], TissueState::Empty);
        }
        assert_eq!(s.ecm_stress.as_ref().map(|e| e[stressed]), Some(0.0));
        assert_eq!(s.tissue_sites(TissueState::Healthy).len(), 22);
    }

    #[test]
    fn ecm_damage_only_hits_healthy_neighbours() {
        let mut engine = LifecycleEngine::new(rules());
        let mut rng = RandomSource::seeded(1);
        let mut s = lattice(TissueState::Empty);
        let tumor = Coord::new(2, 2);
        let healthy = Coord::new(1, 2);
        s.seed_tissue(tumor, TissueState::Tumor);
        s.seed_tissue(healthy, TissueState::Healthy);

        assert_eq!(engine.damage_ecm(&mut s, &mut rng), 1);
        assert_eq!(engine.damage_ecm(&mut s, &mut rng), 1);
        let ecm = s.ecm_stress.as_ref().map(|e| (e[healthy], e.as_slice().iter().sum::<f32>()));
        assert_eq!(ecm, Some((0.5, 0.5)));

        // No healthy neighbour: nothing happens.
        s.seed_tissue(healthy, TissueState::Empty);
        assert_eq!(engine.damage_ecm(&mut s, &mut rng), 0);
    }

    #[test]
    fn division_waits_for_the_cycle_and_picks_an_empty_neighbour() {
        let mut engine = LifecycleEngine::new(rules());
        let mut rng = RandomSource::seeded(9);
        let mut s = lattice(TissueState::Empty);
        let c = Coord::new(2, 2);
        s.seed_tissue(c, TissueState::Tumor);

        assert_eq!(engine.proliferate(&mut s, &mut rng), (0, 0));
        assert_eq!(s.prolif_timer[c], 1);
        assert_eq!(engine.proliferate(&mut s, &mut rng), (1, 0));
        assert_eq!(s.prolif_timer[c], 0);
        let tumors = s.tissue_sites(TissueState::Tumor);
        assert_eq!(tumors.len(), 2);
        let daughter = tumors.into_iter().find(|&t| t != c);
        let adjacent = daughter.map(|d| s.hood.neighbors(c).any(|(n, _)| n == d));
        assert_eq!(adjacent, Some(true));
    }

    #[test]
    fn underfed_tumor_does_not_advance() {
        let mut engine = LifecycleEngine::new(rules());
        let mut rng = RandomSource::seeded(9);
        let mut s = lattice(TissueState::Empty);
        let c = Coord::new(2, 2);
        s.seed_tissue(c, TissueState::Tumor);
        s.nutrient[c] = 0.3;
        engine.proliferate(&mut s, &mut rng);
        engine.proliferate(&mut s, &mut rng);
        assert_eq!(s.prolif_timer[c], 0);
        assert_eq!(s.tissue_sites(TissueState::Tumor).len(), 1);
    }

    #[test]
    fn blocked_division_policy() {
        for (policy, expected_timer) in [(BlockedDivision::Retry, 3), (BlockedDivision::Reset, 0)] {
            let mut engine = LifecycleEngine::new(LifecycleRules {
                blocked_division: policy,
                cycle_length: 1,
                ..rules()
            });
            let mut rng = RandomSource::seeded(4);
            let mut s = lattice(TissueState::Healthy);
            let c = Coord::new(2, 2);
            s.seed_tissue(c, TissueState::Tumor);
            for _ in 0..3 {
                assert_eq!(engine.proliferate(&mut s, &mut rng), (0, 1));
            }
            assert_eq!(s.prolif_timer[c], expected_timer);
        }
    }
}
