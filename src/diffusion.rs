use crate::grid::{Coord, Grid, Neighborhood};
use crate::state::{ImmuneState, TissueState};
use log::{trace, warn};
use rayon::prelude::*;
use tumor_sim_common::{AttractantConfig, DiffusionConfig, Integrator, NutrientConfig, SolverKind, ToxinConfig};

/// Per-occupant reaction coefficients of one scalar field.
///
/// Uptake is first order (`-uptake * u`), production is constant per site.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReactionTerms {
    pub healthy_uptake: f32,
    pub tumor_uptake: f32,
    pub immune_uptake: f32,
    /// First-order loss everywhere outside vessels.
    pub decay: f32,
    pub tumor_production: f32,
    pub dead_tumor_production: f32,
}

impl ReactionTerms {
    #[inline]
    fn at(&self, tissue: TissueState, immune: ImmuneState) -> SiteReaction {
        let mut site = SiteReaction {
            uptake: self.decay,
            production: 0.0,
            pinned: false,
        };
        match tissue {
            TissueState::Healthy => site.uptake += self.healthy_uptake,
            TissueState::Tumor => {
                site.uptake += self.tumor_uptake;
                site.production += self.tumor_production;
            }
            TissueState::DeadTumor => site.production += self.dead_tumor_production,
            TissueState::Vessel => site.pinned = true,
            TissueState::Empty => {}
        }
        if immune.is_present() {
            site.uptake += self.immune_uptake;
        }
        site
    }
}

/// Reaction coefficients resolved for one site, frozen for a whole `relax` call.
#[derive(Debug, Clone, Copy, Default)]
struct SiteReaction {
    uptake: f32,
    production: f32,
    pinned: bool,
}

/// Everything the solver needs to know about one diffusing field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub diffusion_rate: f32,
    /// Value held at vessel sites.
    pub pinned_value: f32,
    pub reaction: ReactionTerms,
}

impl FieldSpec {
    pub fn nutrient(cfg: &NutrientConfig) -> Self {
        FieldSpec {
            name: "nutrient",
            diffusion_rate: cfg.diffusion_rate,
            pinned_value: cfg.supply_level,
            reaction: ReactionTerms {
                healthy_uptake: cfg.healthy_uptake,
                tumor_uptake: cfg.tumor_uptake,
                immune_uptake: cfg.immune_uptake,
                ..ReactionTerms::default()
            },
        }
    }

    pub fn attractant(cfg: &AttractantConfig) -> Self {
        FieldSpec {
            name: "attractant",
            diffusion_rate: cfg.diffusion_rate,
            pinned_value: 0.0,
            reaction: ReactionTerms {
                decay: cfg.decay,
                tumor_production: cfg.tumor_secretion,
                dead_tumor_production: cfg.dead_tumor_secretion,
                ..ReactionTerms::default()
            },
        }
    }

    pub fn toxin(cfg: &ToxinConfig) -> Self {
        FieldSpec {
            name: "toxin",
            diffusion_rate: cfg.diffusion_rate,
            pinned_value: 0.0,
            reaction: ReactionTerms {
                decay: cfg.decay,
                tumor_production: cfg.secretion_rate,
                ..ReactionTerms::default()
            },
        }
    }
}

/// Outcome of relaxing one field for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldReport {
    pub field: &'static str,
    pub iterations: u32,
    /// Largest per-site change in the final iteration.
    pub max_change: f32,
    /// `false` only when the converge solver stopped at its iteration cap.
    pub converged: bool,
}

#[derive(Debug, Clone, Copy)]
enum Strategy {
    Converge {
        integrator: Integrator,
        tolerance: f32,
        max_iterations: u32,
    },
    FluxExchange {
        steps: u32,
    },
}

/// Reaction-diffusion relaxation of scalar fields over the lattice.
///
/// Every sweep reads from a copy of the field taken before the sweep starts;
/// writes only go to the live field (or a separate stage buffer for RK4).
/// Vessel sites are pinned and never updated. All values are clamped at zero.
#[derive(Debug)]
pub struct DiffusionSolver {
    /// Laplacian stencil and boundary policy.
    hood: Neighborhood,
    /// Converge (with its integrator and stopping rule) or flux exchange.
    strategy: Strategy,
    /// Pseudo-time step of one iteration.
    sub_dt: f32,

    // Work buffers, allocated once for the lattice.
    /// Per-site uptake, production and pinning, frozen at the start of `relax`.
    sites: Vec<SiteReaction>,
    /// Copy of the field taken before each sweep; all stencil reads come from here.
    snapshot: Vec<f32>,
    /// Intermediate RK4 state. Empty for Euler and flux exchange.
    stage: Vec<f32>,
    /// RK4 slopes k1..k4. Euler and flux exchange only use `k[0]`.
    k: [Vec<f32>; 4],
}

impl DiffusionSolver {
    /// `hood` carries the Laplacian stencil and the boundary policy.
    pub fn new(hood: Neighborhood, cfg: &DiffusionConfig) -> Self {
        let strategy = match cfg.solver {
            SolverKind::Converge => Strategy::Converge {
                integrator: cfg.integrator,
                tolerance: cfg.tolerance,
                max_iterations: cfg.max_iterations.max(1),
            },
            SolverKind::FluxExchange => Strategy::FluxExchange {
                steps: cfg.flux_steps.max(1),
            },
        };
        let n = hood.size() * hood.size();
        let needs_stages = matches!(
            strategy,
            Strategy::Converge {
                integrator: Integrator::Rk4,
                ..
            }
        );
        let stage_len = if needs_stages { n } else { 0 };
        DiffusionSolver {
            hood,
            strategy,
            sub_dt: cfg.sub_dt,
            sites: vec![SiteReaction::default(); n],
            snapshot: vec![0.0; n],
            stage: vec![0.0; stage_len],
            k: [vec![0.0; n], vec![0.0; stage_len], vec![0.0; stage_len], vec![0.0; stage_len]],
        }
    }

    pub fn neighborhood(&self) -> &Neighborhood {
        &self.hood
    }

    /// Advances `field` by one tick of diffusion plus reaction, with the
    /// occupancy layers held fixed for the duration of the call.
    pub fn relax(
        &mut self,
        field: &mut Grid<f32>,
        spec: &FieldSpec,
        tissue: &Grid<TissueState>,
        immune: &Grid<ImmuneState>,
    ) -> FieldReport {
        debug_assert_eq!(field.size(), self.hood.size());
        let terms = spec.reaction;
        self.sites
            .par_iter_mut()
            .zip(tissue.as_slice().par_iter())
            .zip(immune.as_slice().par_iter())
            .for_each(|((site, &t), &i)| *site = terms.at(t, i));

        for (u, site) in field.as_mut_slice().iter_mut().zip(self.sites.iter()) {
            if site.pinned {
                *u = spec.pinned_value;
            }
        }

        let report = match self.strategy {
            Strategy::Converge {
                integrator,
                tolerance,
                max_iterations,
            } => self.converge(field.as_mut_slice(), spec, integrator, tolerance, max_iterations),
            Strategy::FluxExchange { steps } => self.flux_exchange(field.as_mut_slice(), spec, steps),
        };
        trace!(
            "{}: {} iterations, max change {:.3e}",
            report.field,
            report.iterations,
            report.max_change
        );
        report
    }

    fn converge(
        &mut self,
        field: &mut [f32],
        spec: &FieldSpec,
        integrator: Integrator,
        tolerance: f32,
        max_iterations: u32,
    ) -> FieldReport {
        let mut report = FieldReport {
            field: spec.name,
            iterations: 0,
            max_change: 0.0,
            converged: false,
        };
        for iteration in 1..=max_iterations {
            let change = match integrator {
                Integrator::Euler => self.euler_iteration(field, spec.diffusion_rate),
                Integrator::Rk4 => self.rk4_iteration(field, spec.diffusion_rate),
            };
            report.iterations = iteration;
            report.max_change = change;
            if change < tolerance {
                report.converged = true;
                break;
            }
        }
        if !report.converged {
            warn!(
                "{} diffusion stopped at the {}-iteration cap (max change {:.3e}); using best-effort field",
                spec.name, max_iterations, report.max_change
            );
        }
        report
    }

    fn euler_iteration(&mut self, field: &mut [f32], rate: f32) -> f32 {
        self.snapshot.copy_from_slice(field);
        let [k1, ..] = &mut self.k;
        evaluate(&self.hood, rate, &self.sites, &self.snapshot, k1);
        commit(field, &self.snapshot, k1, self.sub_dt)
    }

    fn rk4_iteration(&mut self, field: &mut [f32], rate: f32) -> f32 {
        let h = self.sub_dt;
        self.snapshot.copy_from_slice(field);
        let [k1, k2, k3, k4] = &mut self.k;
        let (hood, sites, base, stage) = (&self.hood, &self.sites, &self.snapshot, &mut self.stage);

        evaluate(hood, rate, sites, base, k1);
        advance(base, k1, 0.5 * h, stage);
        evaluate(hood, rate, sites, stage, k2);
        advance(base, k2, 0.5 * h, stage);
        evaluate(hood, rate, sites, stage, k3);
        advance(base, k3, h, stage);
        evaluate(hood, rate, sites, stage, k4);

        k1.par_iter_mut()
            .zip(k2.par_iter())
            .zip(k3.par_iter())
            .zip(k4.par_iter())
            .for_each(|(((a, &b), &c), &d)| *a = (*a + 2.0 * b + 2.0 * c + d) / 6.0);
        commit(field, base, k1, h)
    }

    /// Fixed number of pairwise exchanges. Each unordered neighbour pair moves
    /// `rate * sub_dt * weight * (u_a - u_b)` from the richer to the poorer site,
    /// so pure diffusion conserves the field total exactly up to rounding.
    fn flux_exchange(&mut self, field: &mut [f32], spec: &FieldSpec, steps: u32) -> FieldReport {
        let size = self.hood.size();
        let exchange = spec.diffusion_rate * self.sub_dt;
        let mut max_change = 0.0f32;
        for _ in 0..steps {
            self.snapshot.copy_from_slice(field);
            let delta = &mut self.k[0];
            delta.fill(0.0);
            for idx in 0..field.len() {
                let u = self.snapshot[idx];
                let here = Coord::new(idx / size, idx % size);
                let snapshot = &self.snapshot;
                self.hood.for_each_neighbor(here, |n, w| {
                    let j = n.row * size + n.col;
                    // Each pair once, from its lower-indexed end.
                    if j > idx {
                        let moved = exchange * w * (u - snapshot[j]);
                        delta[idx] -= moved;
                        delta[j] += moved;
                    }
                });
                let site = self.sites[idx];
                delta[idx] += (site.production - site.uptake * u) * self.sub_dt;
            }

            max_change = 0.0;
            for ((u, &u0), (&d, site)) in field
                .iter_mut()
                .zip(self.snapshot.iter())
                .zip(delta.iter().zip(self.sites.iter()))
            {
                if site.pinned {
                    continue;
                }
                let next = (u0 + d).max(0.0);
                max_change = max_change.max((next - u0).abs());
                *u = next;
            }
        }
        FieldReport {
            field: spec.name,
            iterations: steps,
            max_change,
            converged: true,
        }
    }
}

/// Writes `du/dt` for every site into `out`, reading only `input`. Rows are
/// processed in parallel.
fn evaluate(hood: &Neighborhood, rate: f32, sites: &[SiteReaction], input: &[f32], out: &mut [f32]) {
    let size = hood.size();
    out.par_chunks_mut(size).enumerate().for_each(|(row, out_row)| {
        for (col, du) in out_row.iter_mut().enumerate() {
            let idx = row * size + col;
            let site = sites[idx];
            if site.pinned {
                *du = 0.0;
                continue;
            }
            let u = input[idx];
            let mut laplacian = 0.0f32;
            hood.for_each_neighbor(Coord::new(row, col), |n, w| {
                laplacian += w * (input[n.row * size + n.col] - u);
            });
            *du = rate * laplacian - site.uptake * u + site.production;
        }
    });
}

/// `out = max(base + h * slope, 0)`.
fn advance(base: &[f32], slope: &[f32], h: f32, out: &mut [f32]) {
    out.par_iter_mut()
        .zip(base.par_iter())
        .zip(slope.par_iter())
        .for_each(|((o, &b), &s)| *o = (b + h * s).max(0.0));
}

/// Applies one step to the live field and returns the largest change.
fn commit(field: &mut [f32], base: &[f32], slope: &[f32], h: f32) -> f32 {
    field
        .par_iter_mut()
        .zip(base.par_iter())
        .zip(slope.par_iter())
        .map(|((u, &b), &s)| {
            let next = (b + h * s).max(0.0);
            *u = next;
            (next - b).abs()
        })
        .reduce(|| 0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use tumor_sim_common::{Boundary, Stencil};

    fn config(solver: SolverKind, integrator: Integrator) -> DiffusionConfig {
        DiffusionConfig {
            solver,
            integrator,
            stencil: None,
            sub_dt: 0.1,
            tolerance: 1e-5,
            max_iterations: 20_000,
            flux_steps: 25,
        }
    }

    fn pure_diffusion(rate: f32) -> FieldSpec {
        FieldSpec {
            name: "test",
            diffusion_rate: rate,
            pinned_value: 1.0,
            reaction: ReactionTerms::default(),
        }
    }

    fn layers(size: usize) -> (Grid<TissueState>, Grid<ImmuneState>) {
        (Grid::filled(size, TissueState::Empty), Grid::filled(size, ImmuneState::Empty))
    }

    fn bumpy(size: usize) -> Grid<f32> {
        let mut g = Grid::filled(size, 0.0);
        for (i, u) in g.as_mut_slice().iter_mut().enumerate() {
            *u = ((i * 37) % 11) as f32 / 10.0;
        }
        g
    }

    #[test]
    fn uniform_steady_state_stops_after_one_iteration() {
        for integrator in [Integrator::Euler, Integrator::Rk4] {
            let hood = Neighborhood::new(8, Stencil::Eight, Boundary::Periodic);
            let mut solver = DiffusionSolver::new(hood, &config(SolverKind::Converge, integrator));
            let (tissue, immune) = layers(8);
            let mut field = Grid::filled(8, 1.0f32);
            for _ in 0..3 {
                let report = solver.relax(&mut field, &pure_diffusion(1.0), &tissue, &immune);
                assert_eq!(report.iterations, 1);
                assert!(report.converged);
                assert_eq!(report.max_change, 0.0);
            }
            assert!(field.as_slice().iter().all(|&u| u == 1.0));
        }
    }

    #[test]
    fn flux_exchange_conserves_total() {
        for stencil in [Stencil::Four, Stencil::Six, Stencil::Eight] {
            for boundary in [Boundary::Periodic, Boundary::Reflective] {
                let hood = Neighborhood::new(6, stencil, boundary);
                let mut solver = DiffusionSolver::new(hood, &config(SolverKind::FluxExchange, Integrator::Euler));
                let (tissue, immune) = layers(6);
                let mut field = bumpy(6);
                let before: f32 = field.as_slice().iter().sum();
                let report = solver.relax(&mut field, &pure_diffusion(1.0), &tissue, &immune);
                let after: f32 = field.as_slice().iter().sum();
                assert_eq!(report.iterations, 25);
                assert_relative_eq!(before, after, max_relative = 1e-4);
                assert!(field.as_slice().iter().all(|&u| u >= 0.0));
            }
        }
    }

    #[test]
    fn flux_exchange_smooths_differences() {
        let hood = Neighborhood::new(6, Stencil::Four, Boundary::Reflective);
        let mut solver = DiffusionSolver::new(hood, &config(SolverKind::FluxExchange, Integrator::Euler));
        let (tissue, immune) = layers(6);
        let mut field = bumpy(6);
        let spread = |g: &Grid<f32>| {
            let s = g.as_slice();
            s.iter().cloned().fold(f32::MIN, f32::max) - s.iter().cloned().fold(f32::MAX, f32::min)
        };
        let initial = spread(&field);
        solver.relax(&mut field, &pure_diffusion(1.0), &tissue, &immune);
        assert!(spread(&field) < initial);
    }

    #[test]
    fn vessels_stay_pinned_and_feed_the_interior() {
        let size = 6;
        let hood = Neighborhood::new(size, Stencil::Four, Boundary::Periodic);
        let mut solver = DiffusionSolver::new(hood, &config(SolverKind::Converge, Integrator::Euler));
        let (mut tissue, immune) = layers(size);
        for col in 0..size {
            tissue.set(Coord::new(0, col), TissueState::Vessel);
        }
        let mut field = Grid::filled(size, 0.0f32);
        let report = solver.relax(&mut field, &pure_diffusion(1.0), &tissue, &immune);
        assert!(report.converged);
        for col in 0..size {
            assert_eq!(field.get(Coord::new(0, col)), 1.0);
        }
        assert!(field.get(Coord::new(size - 1, 2)) > 0.5);
    }

    #[test]
    fn heavy_uptake_clamps_at_zero() {
        let hood = Neighborhood::new(5, Stencil::Four, Boundary::Reflective);
        let mut solver = DiffusionSolver::new(hood, &config(SolverKind::Converge, Integrator::Euler));
        let (mut tissue, immune) = layers(5);
        tissue.fill(TissueState::Tumor);
        let spec = FieldSpec {
            reaction: ReactionTerms {
                tumor_uptake: 50.0,
                ..ReactionTerms::default()
            },
            ..pure_diffusion(1.0)
        };
        let mut field = bumpy(5);
        solver.relax(&mut field, &spec, &tissue, &immune);
        assert!(field.as_slice().iter().all(|&u| (0.0..1e-3).contains(&u)));
    }

    #[test]
    fn iteration_cap_returns_best_effort_field() {
        let hood = Neighborhood::new(6, Stencil::Eight, Boundary::Reflective);
        let cfg = DiffusionConfig {
            max_iterations: 3,
            tolerance: 1e-12,
            ..config(SolverKind::Converge, Integrator::Euler)
        };
        let mut solver = DiffusionSolver::new(hood, &cfg);
        let (tissue, immune) = layers(6);
        let mut field = bumpy(6);
        let report = solver.relax(&mut field, &pure_diffusion(1.0), &tissue, &immune);
        assert_eq!(report.iterations, 3);
        assert!(!report.converged);
        assert!(report.max_change > 0.0);
    }

    #[test]
    fn euler_and_rk4_reach_the_same_steady_state() {
        let size = 7;
        let (mut tissue, immune) = layers(size);
        for col in 0..size {
            tissue.set(Coord::new(0, col), TissueState::Vessel);
            tissue.set(Coord::new(size - 1, col), TissueState::Vessel);
        }
        tissue.set(Coord::new(3, 3), TissueState::Tumor);
        let spec = FieldSpec {
            reaction: ReactionTerms {
                tumor_uptake: 2.0,
                ..ReactionTerms::default()
            },
            ..pure_diffusion(1.0)
        };
        let mut results = Vec::new();
        for integrator in [Integrator::Euler, Integrator::Rk4] {
            let hood = Neighborhood::new(size, Stencil::Four, Boundary::Periodic);
            let mut solver = DiffusionSolver::new(hood, &config(SolverKind::Converge, integrator));
            let mut field = Grid::filled(size, 0.5f32);
            let report = solver.relax(&mut field, &spec, &tissue, &immune);
            assert!(report.converged);
            results.push(field);
        }
        for (a, b) in results[0].as_slice().iter().zip(results[1].as_slice()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-2);
        }
        // The consuming site sits in a dip.
        assert!(results[0].get(Coord::new(3, 3)) < results[0].get(Coord::new(2, 3)));
    }

    #[test]
    fn attractant_is_produced_by_tumor() {
        let size = 5;
        let cfg = AttractantConfig {
            diffusion_rate: 1.0,
            tumor_secretion: 0.1,
            dead_tumor_secretion: 0.0,
            decay: 0.05,
            kill_boost: 0.5,
        };
        let hood = Neighborhood::new(size, Stencil::Four, Boundary::Reflective);
        let mut solver = DiffusionSolver::new(hood, &config(SolverKind::Converge, Integrator::Euler));
        let (mut tissue, immune) = layers(size);
        tissue.set(Coord::new(2, 2), TissueState::Tumor);
        let mut field = Grid::filled(size, 0.0f32);
        solver.relax(&mut field, &FieldSpec::attractant(&cfg), &tissue, &immune);
        let centre = field.get(Coord::new(2, 2));
        assert!(centre > 0.0);
        assert!(centre > field.get(Coord::new(0, 0)));
    }
}
