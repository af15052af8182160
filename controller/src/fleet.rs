use std::{collections::BTreeMap, path::Path};

use chrono::{Duration, Utc};
use log::{debug, info};
use mvplan_structs::vehicle::{Vehicle, VehicleDirectory, VehicleState};
use parking_lot::RwLock;

use crate::PlanningError;

/// Vehicle directory fed by state reports. A vehicle is active while its
/// last report is younger than `timeout`.
pub struct Fleet {
    roster: Vec<Vehicle>,
    states: RwLock<BTreeMap<String, VehicleState>>,
    timeout: Duration,
}

impl Fleet {
    pub fn new(roster: Vec<Vehicle>, timeout: Duration) -> Self {
        Self {
            roster,
            states: RwLock::new(BTreeMap::new()),
            timeout,
        }
    }

    /// Reads a JSON array of vehicles.
    pub fn load(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, PlanningError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| PlanningError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let roster: Vec<Vehicle> = serde_json::from_str(&raw)?;
        info!("{} vehicles in roster {}", roster.len(), path.display());
        Ok(Self::new(roster, timeout))
    }

    /// Records a state report. Reports from vehicles outside the roster are
    /// dropped.
    pub fn report(&self, state: VehicleState) -> bool {
        if !self.roster.iter().any(|v| v.id == state.vehicle) {
            debug!("state from unknown vehicle {}", state.vehicle);
            return false;
        }
        self.states.write().insert(state.vehicle.clone(), state);
        true
    }
}

impl VehicleDirectory for Fleet {
    fn active_vehicles(&self) -> Vec<Vehicle> {
        let now = Utc::now();
        let states = self.states.read();
        self.roster
            .iter()
            .filter(|v| states.get(&v.id).map_or(false, |s| now - s.time <= self.timeout))
            .cloned()
            .collect()
    }

    fn vehicle(&self, id: &str) -> Option<Vehicle> {
        self.roster.iter().find(|v| v.id == id).cloned()
    }

    fn current_state(&self, id: &str) -> Option<VehicleState> {
        self.states.read().get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvplan_structs::Location;

    #[test]
    fn silent_vehicles_are_inactive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        std::fs::write(
            &path,
            r#"[{"id":"lauv-xplore-1","nickname":"x1","payloads":["ctd"]},
               {"id":"lauv-xplore-2","nickname":"x2","speed":1.5}]"#,
        )
        .unwrap();
        let fleet = Fleet::load(&path, Duration::seconds(60)).unwrap();
        assert!(fleet.active_vehicles().is_empty());

        let report = |id: &str, age: i64| VehicleState {
            vehicle: id.into(),
            location: Location::new(41.18, -8.70),
            time: Utc::now() - Duration::seconds(age),
            fuel: None,
        };
        assert!(fleet.report(report("lauv-xplore-1", 5)));
        assert!(fleet.report(report("lauv-xplore-2", 600)));
        assert!(!fleet.report(report("lauv-noptilus-3", 0)));

        let active: Vec<String> = fleet.active_vehicles().into_iter().map(|v| v.id).collect();
        assert_eq!(active, vec!["lauv-xplore-1"]);
        assert_eq!(fleet.vehicle("lauv-xplore-2").unwrap().speed, 1.5);
        assert!(fleet.current_state("lauv-xplore-2").is_some());
    }
}
