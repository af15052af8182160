use serde::{Deserialize, Serialize};

pub mod allocation;
pub mod geodesy;
pub mod payload;
pub mod task;
pub mod tasklist;
pub mod vehicle;

/// Geographic position in decimal degrees.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn eq_approx(&self, other: &Location) -> bool {
        (self.lat - other.lat).abs() < 1e-9 && (self.lon - other.lon).abs() < 1e-9
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown payload '{0}'")]
    UnknownPayload(String),
    #[error("task list line {line}: {reason}")]
    TaskList { line: u64, reason: String },
    #[error("task list: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
