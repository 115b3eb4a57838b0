use crate::grid::{Coord, Grid, Neighborhood};
use tumor_sim_common::NecrosisOutcome;

/// Occupant of the tissue layer. Discriminants are the snapshot codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TissueState {
    Empty = 0,
    Healthy = 10,
    Tumor = 20,
    DeadTumor = 30,
    Vessel = 50,
}

impl TissueState {
    pub const ALL: [TissueState; 5] = [
        TissueState::Empty,
        TissueState::Healthy,
        TissueState::Tumor,
        TissueState::DeadTumor,
        TissueState::Vessel,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Occupant of the immune layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ImmuneState {
    Empty = 0,
    Immune = 40,
}

impl ImmuneState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_present(self) -> bool {
        self == ImmuneState::Immune
    }
}

/// Which optional scalar layers a run carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionalLayers {
    pub attractant: bool,
    pub toxin: bool,
    pub ecm: bool,
}

/// All per-site state of the lattice, one dense layer per quantity.
///
/// Tissue and immune occupancy live in separate layers so an immune cell can
/// sit on top of any tissue state. Counters are tied to their occupant: the
/// transition helpers below are the only code that changes occupancy, and each
/// one leaves the counters of the affected site consistent.
#[derive(Debug, Clone)]
pub struct LatticeState {
    /// Neighbourhood used by the tissue rules (proliferation, ECM damage, random walk).
    pub hood: Neighborhood,

    pub tissue: Grid<TissueState>,
    pub immune: Grid<ImmuneState>,

    // --- Scalar fields ---
    pub nutrient: Grid<f32>,
    pub attractant: Option<Grid<f32>>,
    pub toxin: Option<Grid<f32>>,
    pub ecm_stress: Option<Grid<f32>>,

    // --- Counters ---
    /// Ticks of tumor growth since the last division.
    pub prolif_timer: Grid<u32>,
    /// Kills credited to the immune cell at the site.
    pub kill_count: Grid<u32>,
    /// Ticks the immune cell at the site has survived.
    pub lifespan: Grid<u32>,
}

impl LatticeState {
    /// Allocates an all-empty lattice with zeroed fields and counters.
    pub fn new(hood: Neighborhood, layers: OptionalLayers) -> Self {
        let size = hood.size();
        let field = |enabled: bool| enabled.then(|| Grid::filled(size, 0.0f32));
        LatticeState {
            hood,
            tissue: Grid::filled(size, TissueState::Empty),
            immune: Grid::filled(size, ImmuneState::Empty),
            nutrient: Grid::filled(size, 0.0),
            attractant: field(layers.attractant),
            toxin: field(layers.toxin),
            ecm_stress: field(layers.ecm),
            prolif_timer: Grid::filled(size, 0),
            kill_count: Grid::filled(size, 0),
            lifespan: Grid::filled(size, 0),
        }
    }

    pub fn size(&self) -> usize {
        self.hood.size()
    }

    pub fn layers(&self) -> OptionalLayers {
        OptionalLayers {
            attractant: self.attractant.is_some(),
            toxin: self.toxin.is_some(),
            ecm: self.ecm_stress.is_some(),
        }
    }

    // --- Tissue transitions ---

    /// Places `state` at `c` during initial seeding, clearing the site's tumor
    /// timer and ECM stress.
    pub fn seed_tissue(&mut self, c: Coord, state: TissueState) {
        self.tissue[c] = state;
        self.prolif_timer[c] = 0;
        if let Some(ecm) = self.ecm_stress.as_mut() {
            ecm[c] = 0.0;
        }
    }

    /// A healthy cell dies and leaves an empty site with no residual stress.
    pub fn healthy_dies(&mut self, c: Coord) {
        debug_assert_eq!(self.tissue[c], TissueState::Healthy);
        self.tissue[c] = TissueState::Empty;
        if let Some(ecm) = self.ecm_stress.as_mut() {
            ecm[c] = 0.0;
        }
    }

    /// A tumor cell is killed by an immune cell.
    pub fn tumor_apoptosis(&mut self, c: Coord) {
        debug_assert_eq!(self.tissue[c], TissueState::Tumor);
        self.tissue[c] = TissueState::Empty;
        self.prolif_timer[c] = 0;
    }

    /// A tumor cell starves.
    pub fn tumor_necrosis(&mut self, c: Coord, outcome: NecrosisOutcome) {
        debug_assert_eq!(self.tissue[c], TissueState::Tumor);
        self.tissue[c] = match outcome {
            NecrosisOutcome::DeadTumor => TissueState::DeadTumor,
            NecrosisOutcome::Empty => TissueState::Empty,
        };
        self.prolif_timer[c] = 0;
    }

    /// A daughter cell takes an empty site.
    pub fn spawn_tumor(&mut self, c: Coord) {
        debug_assert_eq!(self.tissue[c], TissueState::Empty);
        self.tissue[c] = TissueState::Tumor;
        self.prolif_timer[c] = 0;
    }

    // --- Immune transitions ---

    /// Adds a fresh immune cell. Returns `false` (and changes nothing) when the
    /// site is already occupied.
    pub fn place_immune(&mut self, c: Coord) -> bool {
        if self.immune[c].is_present() {
            return false;
        }
        self.immune[c] = ImmuneState::Immune;
        self.kill_count[c] = 0;
        self.lifespan[c] = 0;
        true
    }

    pub fn immune_dies(&mut self, c: Coord) {
        self.immune[c] = ImmuneState::Empty;
        self.kill_count[c] = 0;
        self.lifespan[c] = 0;
    }

    /// Moves the immune cell at `from` to `to` together with its counters.
    /// Returns `false` when `to` is occupied; the cell then stays put.
    pub fn move_immune(&mut self, from: Coord, to: Coord) -> bool {
        debug_assert!(self.immune[from].is_present());
        if from == to || self.immune[to].is_present() {
            return false;
        }
        self.immune[to] = ImmuneState::Immune;
        self.kill_count[to] = self.kill_count[from];
        self.lifespan[to] = self.lifespan[from];
        self.immune_dies(from);
        true
    }

    // --- Queries ---

    /// Coordinates holding `state`, in raster order.
    pub fn tissue_sites(&self, state: TissueState) -> Vec<Coord> {
        self.tissue.coords().filter(|&c| self.tissue[c] == state).collect()
    }

    /// Coordinates holding an immune cell, in raster order.
    pub fn immune_sites(&self) -> Vec<Coord> {
        self.immune.coords().filter(|&c| self.immune[c].is_present()).collect()
    }

    pub fn immune_count(&self) -> usize {
        self.immune.as_slice().iter().filter(|s| s.is_present()).count()
    }

    /// Field value the motility rules follow: the attractant when modelled.
    pub fn chemotactic_field(&self) -> Option<&Grid<f32>> {
        self.attractant.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tumor_sim_common::{Boundary, Stencil};

    fn lattice() -> LatticeState {
        let hood = Neighborhood::new(5, Stencil::Four, Boundary::Periodic);
        LatticeState::new(hood, OptionalLayers { attractant: true, toxin: false, ecm: true })
    }

    #[test]
    fn new_lattice_is_empty() {
        let s = lattice();
        assert_eq!(s.size(), 5);
        assert!(s.tissue.as_slice().iter().all(|&t| t == TissueState::Empty));
        assert_eq!(s.immune_count(), 0);
        assert!(s.toxin.is_none());
        assert_eq!(s.layers(), OptionalLayers { attractant: true, toxin: false, ecm: true });
    }

    #[test]
    fn moving_carries_counters_and_clears_source() {
        let mut s = lattice();
        let a = Coord::new(2, 2);
        let b = Coord::new(2, 3);
        assert!(s.place_immune(a));
        s.kill_count[a] = 3;
        s.lifespan[a] = 17;
        assert!(s.move_immune(a, b));
        assert_eq!((s.kill_count[b], s.lifespan[b]), (3, 17));
        assert_eq!((s.kill_count[a], s.lifespan[a]), (0, 0));
        assert_eq!(s.immune[a], ImmuneState::Empty);
    }

    #[test]
    fn occupied_targets_are_refused() {
        let mut s = lattice();
        let a = Coord::new(1, 1);
        let b = Coord::new(1, 2);
        assert!(s.place_immune(a));
        assert!(s.place_immune(b));
        s.lifespan[b] = 9;
        assert!(!s.place_immune(b));
        assert_eq!(s.lifespan[b], 9);
        assert!(!s.move_immune(a, b));
        assert_eq!(s.immune_count(), 2);
    }

    #[test]
    fn deaths_reset_counters() {
        let mut s = lattice();
        let c = Coord::new(0, 4);
        s.place_immune(c);
        s.kill_count[c] = 5;
        s.lifespan[c] = 40;
        s.immune_dies(c);
        assert_eq!((s.kill_count[c], s.lifespan[c]), (0, 0));

        s.seed_tissue(c, TissueState::Tumor);
        s.prolif_timer[c] = 4;
        s.tumor_necrosis(c, NecrosisOutcome::DeadTumor);
        assert_eq!(s.tissue[c], TissueState::DeadTumor);
        assert_eq!(s.prolif_timer[c], 0);

        let h = Coord::new(3, 3);
        s.seed_tissue(h, TissueState::Healthy);
        if let Some(ecm) = s.ecm_stress.as_mut() {
            ecm[h] = 0.7;
        }
        s.healthy_dies(h);
        assert_eq!(s.tissue[h], TissueState::Empty);
        assert_eq!(s.ecm_stress.as_ref().map(|e| e[h]), Some(0.0));
    }

    #[test]
    fn snapshot_codes_are_stable() {
        let codes: Vec<u8> = TissueState::ALL.iter().map(|t| t.code()).collect();
        assert_eq!(codes, vec![0, 10, 20, 30, 50]);
        assert_eq!(ImmuneState::Immune.code(), 40);
    }
}
