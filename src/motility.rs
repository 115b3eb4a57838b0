use crate::grid::{Coord, Grid, Neighborhood};
use crate::rng::RandomSource;
use crate::state::LatticeState;
use std::f32::consts::FRAC_PI_4;
use tumor_sim_common::{vec_to_angle, MotilityMode, Stencil, Vec2};

/// `(dr, dc)` of the eight compass octants, counter-clockwise from +x
/// (x runs along columns, y along rows).
pub const COMPASS: [(isize, isize); 8] = [
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
];

/// Buckets a direction into its nearest compass octant. Vectors too short to
/// have a direction map to `None`, meaning "stay".
pub fn octant(direction: Vec2) -> Option<(isize, isize)> {
    if direction.is_negligible() {
        return None;
    }
    let sector = (vec_to_angle(direction) / FRAC_PI_4).round() as i32;
    Some(COMPASS[sector.rem_euclid(8) as usize])
}

/// Discrete gradient of `field` at `c`: centred differences where both
/// neighbours exist, one-sided at non-wrapping edges.
pub fn gradient(field: &Grid<f32>, hood: &Neighborhood, c: Coord) -> Vec2 {
    let here = field[c];
    let along = |dr: isize, dc: isize| {
        match (hood.step(c, -dr, -dc), hood.step(c, dr, dc)) {
            (Some(m), Some(p)) => 0.5 * (field[p] - field[m]),
            (None, Some(p)) => field[p] - here,
            (Some(m), None) => here - field[m],
            (None, None) => 0.0,
        }
    };
    Vec2::new(along(0, 1), along(1, 0))
}

/// Moves immune cells one site per tick.
#[derive(Debug)]
pub struct MotilityEngine {
    /// How each cell picks its target site.
    mode: MotilityMode,
    /// Scale of the unit-circle noise added to the gradient. Zero disables the draw.
    noise: f32,
    /// Eight-way neighbourhood used for compass steps.
    compass: Neighborhood,
    /// Scratch list of neighbour sites, reused across cells.
    candidates: Vec<Coord>,
}

impl MotilityEngine {
    pub fn new(mode: MotilityMode, noise: f32, hood: &Neighborhood) -> Self {
        MotilityEngine {
            mode,
            noise,
            compass: hood.with_stencil(Stencil::Eight),
            candidates: Vec::with_capacity(8),
        }
    }

    pub fn mode(&self) -> MotilityMode {
        self.mode
    }

    /// Visits every immune cell once, in shuffled order, and moves it when its
    /// chosen target is free. The chemotactic field is only read. Returns the
    /// number of cells that moved.
    pub fn move_all(&mut self, state: &mut LatticeState, rng: &mut RandomSource) -> u32 {
        let mut agents = state.immune_sites();
        rng.shuffle(&mut agents);

        let mut moved = 0;
        for from in agents {
            let target = match self.mode {
                MotilityMode::RandomWalk => {
                    state.hood.collect_where(from, &mut self.candidates, |_| true);
                    rng.pick(&self.candidates)
                }
                MotilityMode::Gradient | MotilityMode::SteepestNeighbor => {
                    let bias = match (self.mode, state.chemotactic_field()) {
                        (MotilityMode::Gradient, Some(field)) => gradient(field, &self.compass, from),
                        (_, Some(field)) => self.steepest_neighbor(field, from),
                        (_, None) => Vec2::zero(),
                    };
                    let direction = if self.noise > 0.0 {
                        bias + rng.unit_circle() * self.noise
                    } else {
                        bias
                    };
                    octant(direction).and_then(|(dr, dc)| self.compass.step(from, dr, dc))
                }
            };
            if let Some(to) = target {
                if state.move_immune(from, to) {
                    moved += 1;
                }
            }
        }
        moved
    }

    /// Points at the highest-valued of the eight neighbours, scaled by how much
    /// it exceeds the current site. Zero when no neighbour is higher.
    fn steepest_neighbor(&self, field: &Grid<f32>, c: Coord) -> Vec2 {
        let here = field[c];
        let mut best: Option<((isize, isize), f32)> = None;
        for &(dr, dc) in COMPASS.iter() {
            if let Some(n) = self.compass.step(c, dr, dc) {
                let rise = field[n] - here;
                if rise > 0.0 && best.map_or(true, |(_, r)| rise > r) {
                    best = Some(((dr, dc), rise));
                }
            }
        }
        match best {
            Some(((dr, dc), rise)) => {
                let step = Vec2::new(dc as f32, dr as f32);
                step.scale(rise / step.length())
            }
            None => Vec2::zero(),
        }
    }
}
