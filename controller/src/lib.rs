use std::path::PathBuf;

use mvplan_planner::{DecodeError, SolverError};

pub mod config;
pub mod executive;
pub mod fleet;
pub mod reconcile;
pub mod store;

pub use config::PlannerConfig;
pub use executive::Executive;
pub use fleet::Fleet;
pub use store::MissionState;

#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("vehicle roster: {0}")]
    Roster(#[from] serde_json::Error),
    #[error(transparent)]
    Tasks(#[from] mvplan_structs::Error),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("no tasks or no vehicles to plan for")]
    NothingToPlan,
    #[error("no solution found")]
    NoSolution,
    #[error("cycle {cycle} superseded by cycle {newer}")]
    Superseded { cycle: u64, newer: u64 },
}

impl PlanningError {
    /// The solver ran, or failed to run, without producing a usable plan.
    pub fn is_search_failure(&self) -> bool {
        matches!(
            self,
            PlanningError::Solver(_) | PlanningError::Decode(_) | PlanningError::NoSolution
        )
    }
}
