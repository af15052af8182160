pub mod domain;
pub mod pddl;
pub mod runner;
pub mod search;
pub mod snapshot;

pub use domain::{DomainEncoding, DomainModel};
pub use runner::{SolverConfig, SolverRunner};
pub use search::{search, SearchMode, SearchProgress};
pub use snapshot::{ProblemSnapshot, SnapshotBuilder, SnapshotParams};

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("solver command is empty")]
    NoCommand,
    #[error("could not launch '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no plan within {budget} s")]
    Timeout { budget: u64 },
    #[error("solver run cancelled")]
    Cancelled,
    #[error("no solver output from '{command}'")]
    NoOutput { command: String, stdout: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unrecognized plan line '{0}'")]
    Malformed(String),
    #[error("plan refers to unknown vehicle '{0}'")]
    UnknownVehicle(String),
    #[error("plan refers to unknown task '{0}'")]
    UnknownTask(String),
    #[error("plan refers to unknown location '{0}'")]
    UnknownLocation(String),
}
