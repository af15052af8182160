use std::path::{Path, PathBuf};

use chrono::Duration;
use mvplan_planner::{DomainModel, SearchMode, SnapshotParams, SolverConfig};
use mvplan_structs::Location;
use serde::{Deserialize, Serialize};

use crate::PlanningError;

/// Planner settings. Every field has a default, so an empty file is a
/// valid configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub domain_model: DomainModel,
    /// Longest stretch a vehicle may stay away from its depot (V2).
    pub seconds_away: f64,
    /// Solver budget. 0 selects sampling search.
    pub search_seconds: u64,
    /// Sampling search iterations.
    pub num_tries: u32,
    /// Surveys longer than this (meters) are split before planning.
    pub survey_max_length: f64,
    pub auto_exec: bool,
    pub secs_between_allocations: u64,
    pub tick_millis: u64,
    pub default_location: Location,
    pub fuel_recency_secs: i64,
    pub distance_epsilon: f64,
    pub depot_return_weight: f64,
    /// Vehicles silent for longer than this are not active.
    pub vehicle_timeout_secs: i64,
    pub tasks_file: Option<PathBuf>,
    pub solver: SolverConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let snapshot = SnapshotParams::default();
        Self {
            domain_model: DomainModel::V2,
            seconds_away: 1000.0,
            search_seconds: 10,
            num_tries: 50,
            survey_max_length: 600.0,
            auto_exec: false,
            secs_between_allocations: 30,
            tick_millis: 1000,
            default_location: snapshot.default_location,
            fuel_recency_secs: 300,
            distance_epsilon: 0.01,
            depot_return_weight: 100.0,
            vehicle_timeout_secs: 60,
            tasks_file: None,
            solver: SolverConfig::default(),
        }
    }
}

impl PlannerConfig {
    /// Reads a TOML file. Relative paths inside it are taken relative to
    /// the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PlanningError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| PlanningError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: PlannerConfig = toml::from_str(&raw).map_err(|source| PlanningError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;

        let base = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(tasks_file) = config.tasks_file.as_mut() {
            resolve(tasks_file);
        }
        resolve(&mut config.solver.scratch_dir);
        resolve(&mut config.solver.domain_dir);
        Ok(config)
    }

    pub fn snapshot_params(&self) -> SnapshotParams {
        SnapshotParams {
            model: self.domain_model,
            seconds_away: self.seconds_away,
            depot_return_weight: self.depot_return_weight,
            default_location: self.default_location,
            fuel_recency_secs: self.fuel_recency_secs,
            distance_epsilon: self.distance_epsilon,
        }
    }

    pub fn search_mode(&self) -> SearchMode {
        SearchMode::new(self.search_seconds, self.num_tries)
    }

    pub fn allocation_interval(&self) -> Duration {
        Duration::seconds(self.secs_between_allocations as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mvplanner.toml");
        std::fs::write(
            &path,
            r#"
domain_model = "V1"
search_seconds = 0
tasks_file = "mission.tasks"

[solver]
command = ["optic", "{domain}", "{problem}"]
scratch_dir = "/tmp/mvplanner"
"#,
        )
        .unwrap();

        let config = PlannerConfig::load(&path).unwrap();
        assert_eq!(config.domain_model, DomainModel::V1);
        assert_eq!(config.search_mode(), SearchMode::Sampling { tries: 50 });
        assert_eq!(config.secs_between_allocations, 30);
        assert_eq!(config.tasks_file, Some(dir.path().join("mission.tasks")));
        assert_eq!(config.solver.command[0], "optic");
        assert_eq!(config.solver.fast_args, vec!["-speed"]);
        assert_eq!(config.solver.scratch_dir, PathBuf::from("/tmp/mvplanner"));
        assert_eq!(config.solver.domain_dir, dir.path().join("conf/mvplanner"));
        assert_eq!(config.snapshot_params().model, DomainModel::V1);
    }

    #[test]
    fn bad_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "search_seconds = \"ten\"").unwrap();
        assert!(matches!(PlannerConfig::load(&path), Err(PlanningError::ConfigParse { .. })));
        assert!(matches!(
            PlannerConfig::load(dir.path().join("missing.toml")),
            Err(PlanningError::ConfigIo { .. })
        ));
    }
}
