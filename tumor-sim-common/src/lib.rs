pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    AttractantConfig, BlockedDivision, Boundary, ConfigError, ConfigIssue, DiffusionConfig, EcmConfig,
    ImmuneConfig, InitialConditions, Integrator, IssueKind, LatticeConfig, MotilityMode, NecrosisOutcome,
    NutrientConfig, OutputConfig, OutputFormat, RecruitmentPolicy, SimulationConfig, SolverKind, Stencil,
    TimingConfig, TissueFill, ToxinConfig, TumorConfig, VesselLayout, MAX_LATTICE_SIZE, MIN_LATTICE_SIZE,
};
pub use sim_params::SimParams;
pub use snapshot::{CountsRecord, LatticeSnapshot, PopulationCounts, RunHeader, RunRecord};
pub use vecmath::{vec_to_angle, Vec2};
