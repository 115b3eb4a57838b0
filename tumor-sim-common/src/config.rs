use crate::sim_params::SimParams;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Smallest lattice edge the neighbourhood rules are defined for.
pub const MIN_LATTICE_SIZE: usize = 3;
/// Largest lattice edge accepted by the loader.
pub const MAX_LATTICE_SIZE: usize = 200;

// Declares a configuration enum that is written as a lowercase string in TOML.
macro_rules! config_choice {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            /// Spellings accepted in the configuration file.
            pub const NAMES: &'static [&'static str] = &[$($text),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(()),
                }
            }
        }
    };
}

config_choice! {
    /// How neighbour lookups treat the lattice edge.
    /// `Periodic` wraps columns and stops at the first/last row.
    Boundary { Periodic => "periodic", Reflective => "reflective" }
}

config_choice! {
    /// Tissue placed on every non-vessel, non-tumor site at start-up.
    TissueFill { Healthy => "healthy", Empty => "empty" }
}

config_choice! {
    /// Where vessel sites come from.
    VesselLayout { BoundaryRows => "boundary_rows", Random => "random", Explicit => "explicit" }
}

config_choice! {
    /// Strategy used to relax the scalar fields each tick.
    SolverKind { Converge => "converge", FluxExchange => "flux_exchange" }
}

config_choice! {
    /// Time integrator for the converge solver.
    Integrator { Euler => "euler", Rk4 => "rk4" }
}

config_choice! {
    /// What happens to the proliferation timer when a due division finds no free site.
    BlockedDivision { Retry => "retry", Reset => "reset" }
}

config_choice! {
    /// State left behind by a substrate-starved tumor cell.
    NecrosisOutcome { DeadTumor => "dead_tumor", Empty => "empty" }
}

config_choice! {
    MotilityMode { Gradient => "gradient", SteepestNeighbor => "steepest_neighbor", RandomWalk => "random_walk" }
}

config_choice! {
    RecruitmentPolicy { Vessels => "vessels", Uniform => "uniform", None => "none" }
}

config_choice! {
    /// Serialization used for the lattice snapshot file.
    OutputFormat { Json => "json", Bincode => "bincode", MessagePack => "messagepack" }
}

/// Neighbourhood shape on the lattice. `Six` is a hexagonal neighbourhood in
/// offset-row layout (odd rows shifted half a site to the right).
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stencil {
    Four,
    Six,
    Eight,
}

impl Stencil {
    pub fn from_neighbor_count(count: i64) -> Option<Self> {
        match count {
            4 => Some(Stencil::Four),
            6 => Some(Stencil::Six),
            8 => Some(Stencil::Eight),
            _ => None,
        }
    }

    pub fn neighbor_count(self) -> usize {
        match self {
            Stencil::Four => 4,
            Stencil::Six => 6,
            Stencil::Eight => 8,
        }
    }

    /// Sum of the discrete Laplacian weights; bounds the explicit step size.
    pub fn laplacian_weight_sum(self) -> f32 {
        match self {
            Stencil::Four => 4.0,
            Stencil::Six => 4.0,
            Stencil::Eight => 10.0 / 3.0,
        }
    }

    pub fn is_hexagonal(self) -> bool {
        self == Stencil::Six
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct LatticeConfig {
    pub size: usize,
    pub boundary: Boundary,
    pub stencil: Stencil,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct TimingConfig {
    pub dt_minutes: f32,
    pub total_time_hours: f32,
    pub log_step: u32,
    pub stop_when_cleared: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct InitialConditions {
    /// RNG seed. `None` draws one from the OS at construction.
    pub seed: Option<u64>,
    pub tissue_fill: TissueFill,
    pub nutrient_level: f32,
    /// `(row, column)` of each tumor seed.
    pub tumor_seeds: Vec<(usize, usize)>,
    pub tumor_focus_radius: usize,
    pub immune_ratio: f32,
    pub vessel_layout: VesselLayout,
    pub vessel_density: f32,
    pub vessel_sites: Vec<(usize, usize)>,
    pub prime_fields: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DiffusionConfig {
    pub solver: SolverKind,
    pub integrator: Integrator,
    /// Laplacian stencil; falls back to the lattice stencil when unset.
    pub stencil: Option<Stencil>,
    pub sub_dt: f32,
    pub tolerance: f32,
    pub max_iterations: u32,
    pub flux_steps: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct NutrientConfig {
    pub diffusion_rate: f32,
    pub supply_level: f32,
    pub healthy_uptake: f32,
    pub immune_uptake: f32,
    pub tumor_uptake: f32,
    pub survival_threshold: f32,
    pub proliferation_threshold: f32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct AttractantConfig {
    pub diffusion_rate: f32,
    pub tumor_secretion: f32,
    pub dead_tumor_secretion: f32,
    pub decay: f32,
    pub kill_boost: f32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ToxinConfig {
    pub diffusion_rate: f32,
    pub secretion_rate: f32,
    pub decay: f32,
    pub threshold: f32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct EcmConfig {
    pub damage_rate: f32,
    pub stress_threshold: f32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct TumorConfig {
    /// Ticks of adequate nutrient between divisions.
    pub cycle_length: u32,
    pub blocked_division: BlockedDivision,
    pub necrosis: NecrosisOutcome,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ImmuneConfig {
    pub kill_limit: u32,
    pub life_limit: u32,
    pub survival_threshold: f32,
    /// Fraction of lattice sites the recruitment rule aims to keep occupied.
    pub target_ratio: f32,
    pub noise: f32,
    pub motility: MotilityMode,
    pub recruitment: RecruitmentPolicy,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub base_filename: String,
    pub format: OutputFormat,
    pub save_snapshots: bool,
    pub save_counts: bool,
}

/// Main simulation configuration, loaded from a TOML file.
///
/// Optional sections (`attractant`, `toxin`, `ecm`) switch the matching field
/// and its rules on when present.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub lattice: LatticeConfig,
    pub timing: TimingConfig,
    pub initial_conditions: InitialConditions,
    pub diffusion: DiffusionConfig,
    pub nutrient: NutrientConfig,
    pub attractant: Option<AttractantConfig>,
    pub toxin: Option<ToxinConfig>,
    pub ecm: Option<EcmConfig>,
    pub tumor: TumorConfig,
    pub immune: ImmuneConfig,
    pub output: OutputConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            lattice: LatticeConfig {
                size: 100,
                boundary: Boundary::Periodic,
                stencil: Stencil::Eight,
            },
            timing: TimingConfig {
                dt_minutes: 10.0,
                total_time_hours: 200.0,
                log_step: 10,
                stop_when_cleared: false,
            },
            initial_conditions: InitialConditions {
                seed: None,
                tissue_fill: TissueFill::Healthy,
                nutrient_level: 0.9,
                tumor_seeds: vec![(50, 50)],
                tumor_focus_radius: 0,
                immune_ratio: 0.01,
                vessel_layout: VesselLayout::BoundaryRows,
                vessel_density: 0.0,
                vessel_sites: Vec::new(),
                prime_fields: false,
            },
            diffusion: DiffusionConfig {
                solver: SolverKind::Converge,
                integrator: Integrator::Euler,
                stencil: Some(Stencil::Four),
                sub_dt: 0.01,
                tolerance: 1e-5,
                max_iterations: 1000,
                flux_steps: 50,
            },
            nutrient: NutrientConfig {
                diffusion_rate: 1.0,
                supply_level: 1.0,
                healthy_uptake: 0.01,
                immune_uptake: 0.01,
                tumor_uptake: 0.05,
                survival_threshold: 0.1,
                proliferation_threshold: 0.3,
            },
            attractant: Some(AttractantConfig {
                diffusion_rate: 1.0,
                tumor_secretion: 0.1,
                dead_tumor_secretion: 0.05,
                decay: 0.01,
                kill_boost: 0.5,
            }),
            toxin: None,
            ecm: Some(EcmConfig {
                damage_rate: 0.025,
                stress_threshold: 1.0,
            }),
            tumor: TumorConfig {
                cycle_length: 144,
                blocked_division: BlockedDivision::Retry,
                necrosis: NecrosisOutcome::DeadTumor,
            },
            immune: ImmuneConfig {
                kill_limit: 5,
                life_limit: 500,
                survival_threshold: 0.1,
                target_ratio: 0.01,
                noise: 0.5,
                motility: MotilityMode::Gradient,
                recruitment: RecruitmentPolicy::Vessels,
            },
            output: OutputConfig {
                base_filename: "tumor_run".to_string(),
                format: OutputFormat::Json,
                save_snapshots: true,
                save_counts: true,
            },
        }
    }
}

/// What went wrong with a single configuration field.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueKind {
    NotFound,
    TypeMismatch { expected: &'static str },
    Invalid(String),
}

/// One problem found while reading the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigIssue {
    pub field: String,
    pub kind: IssueKind,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            IssueKind::NotFound => write!(f, "setting '{}' not found", self.field),
            IssueKind::TypeMismatch { expected } => {
                write!(f, "wrong type in setting '{}' (expected {})", self.field, expected)
            }
            IssueKind::Invalid(reason) => write!(f, "invalid setting '{}': {}", self.field, reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{} configuration problem(s):\n{}", .0.len(), render_issues(.0))]
    Invalid(Vec<ConfigIssue>),
}

impl ConfigError {
    /// Issues collected during validation; empty for I/O and syntax errors.
    pub fn issues(&self) -> &[ConfigIssue] {
        match self {
            ConfigError::Invalid(issues) => issues,
            _ => &[],
        }
    }
}

fn render_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("  - {}", issue))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collects range violations, keeping only the first one per field.
#[derive(Default)]
struct RangeCheck {
    issues: Vec<ConfigIssue>,
}

impl RangeCheck {
    fn require(&mut self, ok: bool, field: &str, reason: impl Into<String>) {
        if !ok && !self.issues.iter().any(|i| i.field == field) {
            self.issues.push(ConfigIssue {
                field: field.to_string(),
                kind: IssueKind::Invalid(reason.into()),
            });
        }
    }

    // NaN fails every comparison below, so it is rejected everywhere.
    fn non_negative(&mut self, field: &str, value: f32) {
        self.require(value.is_finite() && value >= 0.0, field, "must be a finite value >= 0");
    }

    fn positive(&mut self, field: &str, value: f32) {
        self.require(value.is_finite() && value > 0.0, field, "must be a finite value > 0");
    }

    fn fraction(&mut self, field: &str, value: f32) {
        self.require((0.0..=1.0).contains(&value), field, "must lie in [0, 1]");
    }

    fn at_least(&mut self, field: &str, value: u32, min: u32) {
        self.require(value >= min, field, format!("must be an integer >= {}", min));
    }

    fn inside(&mut self, field: &str, sites: &[(usize, usize)], size: usize) {
        if let Some((n, &(row, col))) = sites.iter().enumerate().find(|(_, site)| site.0 >= size || site.1 >= size) {
            self.require(
                false,
                field,
                format!("entry {} ({}, {}) lies outside a {}x{} lattice", n, row, col, size, size),
            );
        }
    }
}

/// Pulls named values out of a parsed TOML table, recording every problem
/// instead of stopping at the first one. Failed reads return a neutral value.
struct ParamReader<'a> {
    root: &'a toml::Table,
    issues: Vec<ConfigIssue>,
}

impl<'a> ParamReader<'a> {
    fn new(root: &'a toml::Table) -> Self {
        ParamReader { root, issues: Vec::new() }
    }

    fn report(&mut self, field: &str, kind: IssueKind) {
        self.issues.push(ConfigIssue { field: field.to_string(), kind });
    }

    fn lookup(&self, path: &str) -> Option<&'a toml::Value> {
        let mut parts = path.split('.');
        let mut value = self.root.get(parts.next()?)?;
        for part in parts {
            value = value.as_table()?.get(part)?;
        }
        Some(value)
    }

    fn has_section(&self, name: &str) -> bool {
        self.root.get(name).is_some_and(|v| v.is_table())
    }

    fn required(&mut self, path: &str) -> Option<&'a toml::Value> {
        let value = self.lookup(path);
        if value.is_none() {
            self.report(path, IssueKind::NotFound);
        }
        value
    }

    fn to_float(&mut self, path: &str, value: &toml::Value) -> Option<f32> {
        match value {
            toml::Value::Float(f) => Some(*f as f32),
            toml::Value::Integer(i) => Some(*i as f32),
            _ => {
                self.report(path, IssueKind::TypeMismatch { expected: "float" });
                None
            }
        }
    }

    fn to_int(&mut self, path: &str, value: &toml::Value) -> Option<i64> {
        match value.as_integer() {
            Some(i) => Some(i),
            None => {
                self.report(path, IssueKind::TypeMismatch { expected: "integer" });
                None
            }
        }
    }

    fn to_bool(&mut self, path: &str, value: &toml::Value) -> Option<bool> {
        match value.as_bool() {
            Some(b) => Some(b),
            None => {
                self.report(path, IssueKind::TypeMismatch { expected: "boolean" });
                None
            }
        }
    }

    fn read_float(&mut self, path: &str) -> Option<f32> {
        self.required(path).and_then(|v| self.to_float(path, v))
    }

    fn read_int(&mut self, path: &str) -> Option<i64> {
        self.required(path).and_then(|v| self.to_int(path, v))
    }

    fn float(&mut self, path: &str) -> f32 {
        self.read_float(path).unwrap_or_default()
    }

    /// Integer that fits a `u32`. Range rules are left to `validate`.
    fn unsigned(&mut self, path: &str) -> u32 {
        match self.read_int(path) {
            Some(value) => match u32::try_from(value) {
                Ok(v) => v,
                Err(_) => {
                    self.report(path, IssueKind::Invalid("must be a non-negative integer".to_string()));
                    0
                }
            },
            None => 0,
        }
    }

    fn unsigned_or(&mut self, path: &str, default: u32) -> u32 {
        if self.lookup(path).is_some() {
            self.unsigned(path)
        } else {
            default
        }
    }

    fn boolean(&mut self, path: &str) -> bool {
        self.required(path)
            .and_then(|v| self.to_bool(path, v))
            .unwrap_or_default()
    }

    fn boolean_or(&mut self, path: &str, default: bool) -> bool {
        match self.lookup(path) {
            Some(v) => self.to_bool(path, v).unwrap_or(default),
            None => default,
        }
    }

    fn string(&mut self, path: &str) -> String {
        match self.required(path) {
            Some(toml::Value::String(s)) => s.clone(),
            Some(_) => {
                self.report(path, IssueKind::TypeMismatch { expected: "string" });
                String::new()
            }
            None => String::new(),
        }
    }

    fn parse_choice<T: FromStr>(&mut self, path: &str, value: &toml::Value, names: &[&str]) -> Option<T> {
        match value.as_str() {
            Some(text) => match text.parse::<T>() {
                Ok(choice) => Some(choice),
                Err(_) => {
                    self.report(
                        path,
                        IssueKind::Invalid(format!("'{}' is not one of {}", text, names.join(", "))),
                    );
                    None
                }
            },
            None => {
                self.report(path, IssueKind::TypeMismatch { expected: "string" });
                None
            }
        }
    }

    fn choice<T: FromStr>(&mut self, path: &str, names: &[&str], fallback: T) -> T {
        self.required(path)
            .and_then(|v| self.parse_choice(path, v, names))
            .unwrap_or(fallback)
    }

    fn choice_or<T: FromStr>(&mut self, path: &str, names: &[&str], default: T) -> T {
        match self.lookup(path) {
            Some(v) => self.parse_choice(path, v, names).unwrap_or(default),
            None => default,
        }
    }

    fn stencil_value(&mut self, path: &str, value: &toml::Value) -> Option<Stencil> {
        let count = self.to_int(path, value)?;
        let stencil = Stencil::from_neighbor_count(count);
        if stencil.is_none() {
            self.report(path, IssueKind::Invalid("neighbour count must be 4, 6 or 8".to_string()));
        }
        stencil
    }

    fn int_list(&mut self, path: &str) -> Vec<i64> {
        match self.required(path) {
            Some(toml::Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_integer() {
                        Some(i) => out.push(i),
                        None => {
                            self.report(path, IssueKind::TypeMismatch { expected: "list of integers" });
                            return Vec::new();
                        }
                    }
                }
                out
            }
            Some(_) => {
                self.report(path, IssueKind::TypeMismatch { expected: "list of integers" });
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Zips two coordinate lists into `(row, column)` pairs.
    fn coordinates(&mut self, rows_path: &str, cols_path: &str) -> Vec<(usize, usize)> {
        let rows = self.int_list(rows_path);
        let cols = self.int_list(cols_path);
        if rows.len() != cols.len() {
            self.report(
                cols_path,
                IssueKind::Invalid(format!(
                    "has {} entries but '{}' has {}",
                    cols.len(),
                    rows_path,
                    rows.len()
                )),
            );
            return Vec::new();
        }
        let mut coords = Vec::with_capacity(rows.len());
        for (n, (&r, &c)) in rows.iter().zip(cols.iter()).enumerate() {
            match (usize::try_from(r), usize::try_from(c)) {
                (Ok(row), Ok(col)) => coords.push((row, col)),
                _ => {
                    self.report(
                        rows_path,
                        IssueKind::Invalid(format!("entry {} ({}, {}) has a negative coordinate", n, r, c)),
                    );
                    return Vec::new();
                }
            }
        }
        coords
    }
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let text = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates a configuration document. All field problems are
    /// reported together.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = text.parse()?;
        Self::from_table(&table)
    }

    pub fn from_table(table: &toml::Table) -> Result<Self, ConfigError> {
        let mut r = ParamReader::new(table);

        // --- lattice ---
        let lattice = LatticeConfig {
            size: r.unsigned("lattice.size") as usize,
            boundary: r.choice("lattice.boundary", Boundary::NAMES, Boundary::Periodic),
            stencil: r
                .required("lattice.stencil")
                .and_then(|v| r.stencil_value("lattice.stencil", v))
                .unwrap_or(Stencil::Four),
        };

        // --- timing ---
        let timing = TimingConfig {
            dt_minutes: r.float("timing.dt_minutes"),
            total_time_hours: r.float("timing.total_time_hours"),
            log_step: r.unsigned("timing.log_step"),
            stop_when_cleared: r.boolean_or("timing.stop_when_cleared", false),
        };

        // --- initial conditions ---
        let seed = match r.lookup("initial_conditions.seed") {
            Some(v) => r.to_int("initial_conditions.seed", v).and_then(|s| match u64::try_from(s) {
                Ok(seed) => Some(seed),
                Err(_) => {
                    r.report("initial_conditions.seed", IssueKind::Invalid("must be >= 0".to_string()));
                    None
                }
            }),
            None => None,
        };
        let vessel_layout = r.choice(
            "initial_conditions.vessel_layout",
            VesselLayout::NAMES,
            VesselLayout::BoundaryRows,
        );
        let vessel_density = if vessel_layout == VesselLayout::Random {
            r.float("initial_conditions.vessel_density")
        } else {
            0.0
        };
        let vessel_sites = if vessel_layout == VesselLayout::Explicit {
            r.coordinates("initial_conditions.vessel_x", "initial_conditions.vessel_y")
        } else {
            Vec::new()
        };
        let immune_ratio = r.float("initial_conditions.immune_ratio");
        let initial_conditions = InitialConditions {
            seed,
            tissue_fill: r.choice("initial_conditions.tissue_fill", TissueFill::NAMES, TissueFill::Healthy),
            nutrient_level: r.float("initial_conditions.nutrient_level"),
            tumor_seeds: r.coordinates("initial_conditions.tumor_x", "initial_conditions.tumor_y"),
            tumor_focus_radius: r.unsigned_or("initial_conditions.tumor_focus_radius", 0) as usize,
            immune_ratio,
            vessel_layout,
            vessel_density,
            vessel_sites,
            prime_fields: r.boolean_or("initial_conditions.prime_fields", false),
        };

        // --- diffusion ---
        let solver = r.choice("diffusion.solver", SolverKind::NAMES, SolverKind::Converge);
        let stencil = match r.lookup("diffusion.stencil") {
            Some(v) => r.stencil_value("diffusion.stencil", v),
            None => None,
        };
        let (integrator, tolerance, max_iterations, flux_steps) = match solver {
            SolverKind::Converge => (
                r.choice_or("diffusion.integrator", Integrator::NAMES, Integrator::Euler),
                r.float("diffusion.tolerance"),
                r.unsigned("diffusion.max_iterations"),
                1,
            ),
            SolverKind::FluxExchange => (Integrator::Euler, 0.0, 1, r.unsigned("diffusion.flux_steps")),
        };
        let diffusion = DiffusionConfig {
            solver,
            integrator,
            stencil,
            sub_dt: r.float("diffusion.sub_dt"),
            tolerance,
            max_iterations,
            flux_steps,
        };

        // --- fields ---
        let nutrient = NutrientConfig {
            diffusion_rate: r.float("nutrient.diffusion_rate"),
            supply_level: r.float("nutrient.supply_level"),
            healthy_uptake: r.float("nutrient.healthy_uptake"),
            immune_uptake: r.float("nutrient.immune_uptake"),
            tumor_uptake: r.float("nutrient.tumor_uptake"),
            survival_threshold: r.float("nutrient.survival_threshold"),
            proliferation_threshold: r.float("nutrient.proliferation_threshold"),
        };
        let attractant = if r.has_section("attractant") {
            Some(AttractantConfig {
                diffusion_rate: r.float("attractant.diffusion_rate"),
                tumor_secretion: r.float("attractant.tumor_secretion"),
                dead_tumor_secretion: r.float("attractant.dead_tumor_secretion"),
                decay: r.float("attractant.decay"),
                kill_boost: r.float("attractant.kill_boost"),
            })
        } else {
            None
        };
        let toxin = if r.has_section("toxin") {
            Some(ToxinConfig {
                diffusion_rate: r.float("toxin.diffusion_rate"),
                secretion_rate: r.float("toxin.secretion_rate"),
                decay: r.float("toxin.decay"),
                threshold: r.float("toxin.threshold"),
            })
        } else {
            None
        };
        let ecm = if r.has_section("ecm") {
            Some(EcmConfig {
                damage_rate: r.float("ecm.damage_rate"),
                stress_threshold: r.float("ecm.stress_threshold"),
            })
        } else {
            None
        };

        // --- cell rules ---
        let tumor = TumorConfig {
            cycle_length: r.unsigned("tumor.cycle_length"),
            blocked_division: r.choice_or("tumor.blocked_division", BlockedDivision::NAMES, BlockedDivision::Retry),
            necrosis: r.choice_or("tumor.necrosis", NecrosisOutcome::NAMES, NecrosisOutcome::DeadTumor),
        };
        let target_ratio = if r.lookup("immune.target_ratio").is_some() {
            r.float("immune.target_ratio")
        } else {
            immune_ratio
        };
        let immune = ImmuneConfig {
            kill_limit: r.unsigned("immune.kill_limit"),
            life_limit: r.unsigned("immune.life_limit"),
            survival_threshold: r.float("immune.survival_threshold"),
            target_ratio,
            noise: r.float("immune.noise"),
            motility: r.choice("immune.motility", MotilityMode::NAMES, MotilityMode::RandomWalk),
            recruitment: r.choice("immune.recruitment", RecruitmentPolicy::NAMES, RecruitmentPolicy::None),
        };

        // --- output ---
        let output = OutputConfig {
            base_filename: r.string("output.base_filename"),
            format: r.choice("output.format", OutputFormat::NAMES, OutputFormat::Json),
            save_snapshots: r.boolean("output.save_snapshots"),
            save_counts: r.boolean("output.save_counts"),
        };

        let config = SimulationConfig {
            lattice,
            timing,
            initial_conditions,
            diffusion,
            nutrient,
            attractant,
            toxin,
            ecm,
            tumor,
            immune,
            output,
        };

        // Range rules run on the values that were read; a field that already
        // failed to read is not reported twice.
        let mut issues = r.issues;
        for issue in config.range_issues() {
            if !issues.iter().any(|i| i.field == issue.field) {
                issues.push(issue);
            }
        }
        if issues.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }

    /// Checks every range and cross-field rule. Configurations built in code
    /// go through the same rules as ones read from TOML.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let issues = self.range_issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }

    fn range_issues(&self) -> Vec<ConfigIssue> {
        let mut v = RangeCheck::default();

        let size = self.lattice.size;
        let size_ok = (MIN_LATTICE_SIZE..=MAX_LATTICE_SIZE).contains(&size);
        v.require(
            size_ok,
            "lattice.size",
            format!("must lie in {}..={}", MIN_LATTICE_SIZE, MAX_LATTICE_SIZE),
        );
        let laplacian = self.diffusion_stencil();
        v.require(
            laplacian.is_hexagonal() == self.lattice.stencil.is_hexagonal(),
            "diffusion.stencil",
            "hexagonal and square stencils cannot be mixed",
        );

        v.positive("timing.dt_minutes", self.timing.dt_minutes);
        v.positive("timing.total_time_hours", self.timing.total_time_hours);
        v.at_least("timing.log_step", self.timing.log_step, 1);

        let ic = &self.initial_conditions;
        v.non_negative("initial_conditions.nutrient_level", ic.nutrient_level);
        v.fraction("initial_conditions.immune_ratio", ic.immune_ratio);
        if ic.vessel_layout == VesselLayout::Random {
            v.fraction("initial_conditions.vessel_density", ic.vessel_density);
        }
        // Site lists are only meaningful against a valid lattice.
        if size_ok {
            v.inside("initial_conditions.tumor_x", &ic.tumor_seeds, size);
            if ic.vessel_layout == VesselLayout::Explicit {
                v.inside("initial_conditions.vessel_x", &ic.vessel_sites, size);
            }
        }

        let d = &self.diffusion;
        v.positive("diffusion.sub_dt", d.sub_dt);
        match d.solver {
            SolverKind::Converge => {
                v.positive("diffusion.tolerance", d.tolerance);
                v.at_least("diffusion.max_iterations", d.max_iterations, 1);
            }
            SolverKind::FluxExchange => v.at_least("diffusion.flux_steps", d.flux_steps, 1),
        }

        let n = &self.nutrient;
        v.non_negative("nutrient.diffusion_rate", n.diffusion_rate);
        v.non_negative("nutrient.supply_level", n.supply_level);
        v.non_negative("nutrient.healthy_uptake", n.healthy_uptake);
        v.non_negative("nutrient.immune_uptake", n.immune_uptake);
        v.non_negative("nutrient.tumor_uptake", n.tumor_uptake);
        v.non_negative("nutrient.survival_threshold", n.survival_threshold);
        v.non_negative("nutrient.proliferation_threshold", n.proliferation_threshold);
        let mut rates = vec![("nutrient.diffusion_rate", n.diffusion_rate)];
        if let Some(a) = &self.attractant {
            v.non_negative("attractant.diffusion_rate", a.diffusion_rate);
            v.non_negative("attractant.tumor_secretion", a.tumor_secretion);
            v.non_negative("attractant.dead_tumor_secretion", a.dead_tumor_secretion);
            v.non_negative("attractant.decay", a.decay);
            v.non_negative("attractant.kill_boost", a.kill_boost);
            rates.push(("attractant.diffusion_rate", a.diffusion_rate));
        }
        if let Some(t) = &self.toxin {
            v.non_negative("toxin.diffusion_rate", t.diffusion_rate);
            v.non_negative("toxin.secretion_rate", t.secretion_rate);
            v.non_negative("toxin.decay", t.decay);
            v.non_negative("toxin.threshold", t.threshold);
            rates.push(("toxin.diffusion_rate", t.diffusion_rate));
        }
        if let Some(e) = &self.ecm {
            v.non_negative("ecm.damage_rate", e.damage_rate);
            v.non_negative("ecm.stress_threshold", e.stress_threshold);
        }
        // Explicit steps stay stable while rate * sub_dt * sum(weights) <= 1.
        let rate_limit = 1.0 / laplacian.laplacian_weight_sum();
        for (field, rate) in rates {
            v.require(
                rate * d.sub_dt <= rate_limit,
                field,
                format!("diffusion_rate * sub_dt must not exceed {:.4} for this stencil", rate_limit),
            );
        }

        v.at_least("tumor.cycle_length", self.tumor.cycle_length, 1);
        let im = &self.immune;
        v.at_least("immune.kill_limit", im.kill_limit, 1);
        v.at_least("immune.life_limit", im.life_limit, 1);
        v.non_negative("immune.survival_threshold", im.survival_threshold);
        v.fraction("immune.target_ratio", im.target_ratio);
        v.non_negative("immune.noise", im.noise);

        v.issues
    }

    /// Stencil used by the diffusion Laplacian.
    pub fn diffusion_stencil(&self) -> Stencil {
        self.diffusion.stencil.unwrap_or(self.lattice.stencil)
    }

    /// Converts the configuration into parameters derived once per run.
    pub fn get_sim_params(&self) -> SimParams {
        let size = self.lattice.size;
        let num_sites = size * size;
        let dt = self.timing.dt_minutes;
        let total_steps = if dt > 0.0 {
            (self.timing.total_time_hours * 60.0 / dt).ceil() as u32
        } else {
            0
        };
        let life_limit = self.immune.life_limit.max(1) as f32;

        SimParams {
            lattice_size: size,
            num_sites,
            dt_minutes: dt,
            total_steps,
            log_step: self.timing.log_step.max(1),
            diffusion_stencil: self.diffusion_stencil(),
            target_immune_count: self.immune.target_ratio * num_sites as f32,
            uniform_recruit_probability: self.immune.target_ratio / life_limit,
        }
    }
}
