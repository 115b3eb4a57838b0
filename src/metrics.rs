use crate::state::{ImmuneState, LatticeState, TissueState};
use rayon::prelude::*;
use tumor_sim_common::PopulationCounts;

/// Counts live occupants of each kind in one read-only pass.
pub fn count_population(state: &LatticeState) -> PopulationCounts {
    state
        .tissue
        .as_slice()
        .par_iter()
        .zip(state.immune.as_slice().par_iter())
        .fold(PopulationCounts::default, |mut acc, (&tissue, &immune)| {
            match tissue {
                TissueState::Healthy => acc.healthy += 1,
                TissueState::Tumor => acc.tumor += 1,
                TissueState::DeadTumor => acc.dead_tumor += 1,
                TissueState::Empty | TissueState::Vessel => {}
            }
            if immune == ImmuneState::Immune {
                acc.immune += 1;
            }
            acc
        })
        .reduce(PopulationCounts::default, |a, b| PopulationCounts {
            healthy: a.healthy + b.healthy,
            tumor: a.tumor + b.tumor,
            dead_tumor: a.dead_tumor + b.dead_tumor,
            immune: a.immune + b.immune,
        })
}

/// The run is over once no tumor cell is left.
pub fn tumor_cleared(counts: &PopulationCounts) -> bool {
    counts.tumor == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Coord, Neighborhood};
    use crate::state::OptionalLayers;
    use tumor_sim_common::{Boundary, Stencil};

    #[test]
    fn counts_every_kind() {
        let hood = Neighborhood::new(4, Stencil::Four, Boundary::Periodic);
        let mut s = LatticeState::new(hood, OptionalLayers::default());
        s.tissue.fill(TissueState::Healthy);
        s.seed_tissue(Coord::new(0, 0), TissueState::Vessel);
        s.seed_tissue(Coord::new(1, 1), TissueState::Tumor);
        s.seed_tissue(Coord::new(1, 2), TissueState::Tumor);
        s.seed_tissue(Coord::new(2, 2), TissueState::DeadTumor);
        s.seed_tissue(Coord::new(3, 3), TissueState::Empty);
        s.place_immune(Coord::new(1, 1));
        s.place_immune(Coord::new(0, 0));

        let counts = count_population(&s);
        assert_eq!(
            counts,
            PopulationCounts {
                healthy: 11,
                tumor: 2,
                dead_tumor: 1,
                immune: 2
            }
        );
        assert!(!tumor_cleared(&counts));
        assert!(tumor_cleared(&PopulationCounts::default()));
    }
}
