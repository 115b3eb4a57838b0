//! Lattice simulation of tumor growth under nutrient limitation and immune attack.
//!
//! [`TumorSimulation`] owns the lattice and advances it one tick at a time;
//! [`RunRecorder`] collects what the driver wants written to disk.

pub mod diffusion;
pub mod grid;
pub mod lifecycle;
pub mod metrics;
pub mod motility;
pub mod output;
pub mod recruitment;
pub mod rng;
pub mod simulation;
pub mod state;

pub use diffusion::{DiffusionSolver, FieldReport, FieldSpec, ReactionTerms};
pub use grid::{Coord, Grid, Neighborhood};
pub use lifecycle::{LifecycleEngine, LifecycleRules, LifecycleTally};
pub use metrics::count_population;
pub use motility::MotilityEngine;
pub use output::RunRecorder;
pub use recruitment::RecruitmentEngine;
pub use rng::RandomSource;
pub use simulation::{TickSummary, TumorSimulation};
pub use state::{ImmuneState, LatticeState, OptionalLayers, TissueState};
