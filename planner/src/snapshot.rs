use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use mvplan_structs::{
    geodesy::Geodesy,
    payload::Payload,
    task::Task,
    vehicle::{Vehicle, VehicleState},
    Location,
};
use serde::{Deserialize, Serialize};

use crate::domain::DomainModel;

/// Knobs of the problem encoding that come from configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotParams {
    pub model: DomainModel,
    /// Seconds a vehicle may stay away from its depot (V2).
    pub seconds_away: f64,
    /// Metric weight of one depot return (V2).
    pub depot_return_weight: f64,
    /// Depot used for vehicles that have not reported a position.
    pub default_location: Location,
    /// Fuel readings older than this are ignored (V1).
    pub fuel_recency_secs: i64,
    /// Lower bound for every distance table entry.
    pub distance_epsilon: f64,
}

impl Default for SnapshotParams {
    fn default() -> Self {
        Self {
            model: DomainModel::V2,
            seconds_away: 1000.0,
            depot_return_weight: 100.0,
            default_location: Location::new(41.185242, -8.704803),
            fuel_recency_secs: 300,
            distance_epsilon: 0.01,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SnapshotVehicle {
    pub vehicle: Vehicle,
    /// Solver object name.
    pub object: String,
    pub location: Location,
    /// Seconds after snapshot time before the vehicle can move.
    pub busy_for: f64,
    pub fuel_fraction: f64,
}

impl SnapshotVehicle {
    pub fn depot(&self) -> String {
        format!("{}_depot", self.object)
    }
}

/// A vehicle-supplied instance of a payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadInstance {
    pub object: String,
    pub vehicle: String,
    pub payload: Payload,
}

#[derive(Clone, Debug)]
pub struct PlanningTask {
    pub task: Task,
    pub object: String,
    pub entry: Location,
    pub exit: Location,
    pub length: f64,
}

impl PlanningTask {
    pub fn data_objects(&self) -> impl Iterator<Item = (String, Payload)> + '_ {
        self.task
            .payloads
            .iter()
            .map(move |p| (format!("{}_{}", self.object, p), *p))
    }
}

/// Immutable input of one planning cycle.
#[derive(Clone, Debug)]
pub struct ProblemSnapshot {
    cycle: u64,
    time: DateTime<Utc>,
    params: SnapshotParams,
    vehicles: Vec<SnapshotVehicle>,
    surveys: Vec<PlanningTask>,
    samples: Vec<PlanningTask>,
    locations: Vec<(String, Location)>,
    distances: BTreeMap<(String, String), f64>,
    roster: BTreeMap<Payload, Vec<PayloadInstance>>,
    diagnostics: Vec<String>,
}

impl ProblemSnapshot {
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn params(&self) -> &SnapshotParams {
        &self.params
    }

    pub fn model(&self) -> DomainModel {
        self.params.model
    }

    pub fn vehicles(&self) -> &[SnapshotVehicle] {
        &self.vehicles
    }

    pub fn surveys(&self) -> &[PlanningTask] {
        &self.surveys
    }

    pub fn samples(&self) -> &[PlanningTask] {
        &self.samples
    }

    pub fn tasks(&self) -> impl Iterator<Item = &PlanningTask> {
        self.surveys.iter().chain(self.samples.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.surveys.is_empty() && self.samples.is_empty()
    }

    pub fn locations(&self) -> &[(String, Location)] {
        &self.locations
    }

    pub fn distances(&self) -> &BTreeMap<(String, String), f64> {
        &self.distances
    }

    pub fn distance(&self, a: &str, b: &str) -> Option<f64> {
        self.distances.get(&(a.to_string(), b.to_string())).copied()
    }

    pub fn roster(&self) -> &BTreeMap<Payload, Vec<PayloadInstance>> {
        &self.roster
    }

    /// Tasks left out of this snapshot and why.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn vehicle_by_object(&self, object: &str) -> Option<&SnapshotVehicle> {
        self.vehicles.iter().find(|v| v.object == object)
    }

    pub fn task_by_object(&self, object: &str) -> Option<&PlanningTask> {
        self.tasks().find(|t| t.object == object)
    }

    pub fn location(&self, name: &str) -> Option<Location> {
        self.locations.iter().find(|(n, _)| n == name).map(|(_, l)| *l)
    }

    pub fn payload_instance(&self, object: &str) -> Option<&PayloadInstance> {
        self.roster.values().flatten().find(|p| p.object == object)
    }
}

/// Collects fleet and task state into a [`ProblemSnapshot`].
pub struct SnapshotBuilder<'a> {
    geo: &'a dyn Geodesy,
    cycle: u64,
    time: DateTime<Utc>,
    params: SnapshotParams,
    deadline: Option<DateTime<Utc>>,
    live: Vec<(Vehicle, Option<VehicleState>)>,
    future: Vec<(Vehicle, VehicleState)>,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(geo: &'a dyn Geodesy, cycle: u64, time: DateTime<Utc>, params: SnapshotParams) -> Self {
        Self {
            geo,
            cycle,
            time,
            params,
            deadline: None,
            live: Vec::new(),
            future: Vec::new(),
        }
    }

    /// Vehicles projected to be busy past `deadline` are left out.
    pub fn deadline(mut self, deadline: Option<DateTime<Utc>>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn live_vehicle(mut self, vehicle: Vehicle, state: Option<VehicleState>) -> Self {
        self.live.push((vehicle, state));
        self
    }

    pub fn future_state(mut self, vehicle: Vehicle, state: VehicleState) -> Self {
        self.future.push((vehicle, state));
        self
    }

    pub fn build(self, tasks: &[Task]) -> ProblemSnapshot {
        #[cfg(feature = "prof")]
        let _p = hprof::enter("snapshot");

        let recency = Duration::seconds(self.params.fuel_recency_secs);

        let mut vehicles: Vec<SnapshotVehicle> = Vec::new();
        for (vehicle, state) in self.live {
            if vehicles.iter().any(|v| v.vehicle.id == vehicle.id) {
                continue;
            }
            let (location, fuel_fraction) = match &state {
                Some(s) => (s.location, s.fuel_fraction(self.time, recency)),
                None => (self.params.default_location, 1.0),
            };
            vehicles.push(SnapshotVehicle {
                object: object_name(&vehicle.nickname),
                vehicle,
                location,
                busy_for: 0.0,
                fuel_fraction,
            });
        }

        for (vehicle, state) in self.future {
            let busy_for = ((state.time - self.time).num_milliseconds() as f64 / 1000.0).max(0.0);
            let fuel_fraction = state.fuel.map(|_| state.fuel_fraction(self.time, recency));
            match vehicles.iter_mut().find(|v| v.vehicle.id == vehicle.id) {
                Some(v) => {
                    v.location = state.location;
                    v.busy_for = busy_for;
                    if let Some(f) = fuel_fraction {
                        v.fuel_fraction = f;
                    }
                }
                None => vehicles.push(SnapshotVehicle {
                    object: object_name(&vehicle.nickname),
                    vehicle,
                    location: state.location,
                    busy_for,
                    fuel_fraction: fuel_fraction.unwrap_or(1.0),
                }),
            }
            if let Some(deadline) = self.deadline {
                if state.time > deadline {
                    info!("{} is busy until {}, past {}: not planning for it", state.vehicle, state.time, deadline);
                    vehicles.retain(|v| v.vehicle.id != state.vehicle);
                }
            }
        }

        let mut roster: BTreeMap<Payload, Vec<PayloadInstance>> = BTreeMap::new();
        for v in vehicles.iter() {
            for p in v.vehicle.payloads.iter() {
                let instances = roster.entry(*p).or_default();
                let object = format!("{}_{}", v.object, p);
                if !instances.iter().any(|i| i.object == object) {
                    instances.push(PayloadInstance {
                        object,
                        vehicle: v.vehicle.id.clone(),
                        payload: *p,
                    });
                }
            }
        }

        let mut diagnostics = Vec::new();
        let mut surveys = Vec::new();
        let mut samples = Vec::new();
        let mut seen = BTreeSet::new();
        for task in tasks.iter().filter(|t| !t.is_allocated()) {
            let missing: Vec<&Payload> = task
                .payloads
                .iter()
                .filter(|p| roster.get(p).map_or(true, |r| r.is_empty()))
                .collect();
            if !missing.is_empty() {
                let msg = format!("{} skipped: no active vehicle carries {:?}", task.name, missing);
                warn!("{}", msg);
                diagnostics.push(msg);
                continue;
            }
            let object = object_name(&task.name);
            if !seen.insert(object.clone()) {
                let msg = format!("{} skipped: duplicate solver name {}", task.name, object);
                warn!("{}", msg);
                diagnostics.push(msg);
                continue;
            }

            let coverage = task.coverage(self.geo);
            let planning_task = PlanningTask {
                task: task.clone(),
                object,
                entry: coverage.entry,
                exit: coverage.exit,
                length: coverage.length,
            };
            if task.geometry.is_survey() {
                surveys.push(planning_task);
            } else {
                samples.push(planning_task);
            }
        }

        let mut locations = Vec::new();
        for v in vehicles.iter() {
            locations.push((v.depot(), v.location));
        }
        for t in surveys.iter() {
            locations.push((format!("{}_entry", t.object), t.entry));
            locations.push((format!("{}_exit", t.object), t.exit));
        }
        for t in samples.iter() {
            locations.push((format!("{}_oi", t.object), t.entry));
        }

        let mut distances = BTreeMap::new();
        for (i, (a, la)) in locations.iter().enumerate() {
            for (b, lb) in locations.iter().skip(i + 1) {
                let d = self.geo.distance(la, lb).max(self.params.distance_epsilon);
                distances.insert((a.clone(), b.clone()), d);
                distances.insert((b.clone(), a.clone()), d);
            }
        }

        debug!(
            "snapshot {}: {} vehicles, {} surveys, {} samples, {} locations",
            self.cycle,
            vehicles.len(),
            surveys.len(),
            samples.len(),
            locations.len()
        );

        ProblemSnapshot {
            cycle: self.cycle,
            time: self.time,
            params: self.params,
            vehicles,
            surveys,
            samples,
            locations,
            distances,
            roster,
            diagnostics,
        }
    }
}

/// Solver-safe identifier: lowercase, no whitespace, no `_` in vehicle names.
pub fn object_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvplan_structs::{
        geodesy::FlatEarth,
        task::{SurveyArea, TaskGeometry},
    };

    fn origin() -> Location {
        Location::new(41.18, -8.70)
    }

    fn sample(name: &str, north: f64, payloads: &[Payload]) -> Task {
        let location = FlatEarth.offset(&origin(), north, 0.0);
        Task::new(name, TaskGeometry::Sample { location }).with_payloads(payloads.iter().copied())
    }

    fn state(vehicle: &str, time: DateTime<Utc>) -> VehicleState {
        VehicleState {
            vehicle: vehicle.into(),
            location: origin(),
            time,
            fuel: None,
        }
    }

    #[test]
    fn allocated_tasks_are_excluded() {
        let _ = env_logger::try_init();
        let now = Utc::now();
        let mut taken = sample("t02", 200.0, &[Payload::Ctd]);
        taken.set_allocation("mvplanner-001-x1", "lauv-xplore-1");
        let tasks = vec![sample("t01", 100.0, &[Payload::Ctd]), taken];

        let snapshot = SnapshotBuilder::new(&FlatEarth, 1, now, SnapshotParams::default())
            .live_vehicle(Vehicle::new("lauv-xplore-1", "x1", vec![Payload::Ctd]), Some(state("lauv-xplore-1", now)))
            .build(&tasks);

        assert_eq!(snapshot.samples().len(), 1);
        assert!(snapshot.tasks().all(|t| t.task.allocation().is_none()));
        assert_eq!(snapshot.samples()[0].object, "t01");
    }

    #[test]
    fn unsatisfiable_payload_is_diagnosed() {
        let now = Utc::now();
        let tasks = vec![sample("t01", 100.0, &[Payload::Multibeam]), sample("t02", 50.0, &[Payload::Ctd])];
        let snapshot = SnapshotBuilder::new(&FlatEarth, 1, now, SnapshotParams::default())
            .live_vehicle(Vehicle::new("lauv-xplore-1", "x1", vec![Payload::Ctd]), None)
            .build(&tasks);

        assert_eq!(snapshot.samples().len(), 1);
        assert!(snapshot.task_by_object("t01").is_none());
        assert_eq!(snapshot.diagnostics().len(), 1);
        assert!(snapshot.diagnostics()[0].contains("t01"));
    }

    #[test]
    fn distance_table_symmetric_and_floored() {
        let now = Utc::now();
        let area = Task::new(
            "t03",
            TaskGeometry::Area(SurveyArea {
                center: origin(),
                width: 40.0,
                length: 300.0,
                bearing: 10.0,
            }),
        );
        // Sample placed exactly on the vehicle position.
        let tasks = vec![sample("t01", 0.0, &[]), sample("t02", 120.0, &[]), area];
        let params = SnapshotParams {
            distance_epsilon: 0.5,
            ..Default::default()
        };
        let snapshot = SnapshotBuilder::new(&FlatEarth, 1, now, params)
            .live_vehicle(Vehicle::new("lauv-xplore-1", "x1", vec![]), Some(state("lauv-xplore-1", now)))
            .build(&tasks);

        let n = snapshot.locations().len();
        assert_eq!(n, 5);
        assert_eq!(snapshot.distances().len(), n * (n - 1));
        for ((a, b), d) in snapshot.distances() {
            assert!(*d >= 0.5);
            let back = snapshot.distance(b, a).unwrap();
            assert!((back - d).abs() < 1e-9);
        }
        assert_eq!(snapshot.distance("x1_depot", "t01_oi"), Some(0.5));
    }

    #[test]
    fn future_states_fold_in_and_respect_deadline() {
        let now = Utc::now();
        let elsewhere = FlatEarth.offset(&origin(), 500.0, 500.0);
        let x1 = Vehicle::new("lauv-xplore-1", "x1", vec![Payload::Ctd]);
        let x2 = Vehicle::new("lauv-xplore-2", "x2", vec![Payload::Sidescan]);
        let x3 = Vehicle::new("lauv-xplore-3", "x3", vec![Payload::Camera]);

        let snapshot = SnapshotBuilder::new(&FlatEarth, 7, now, SnapshotParams::default())
            .deadline(Some(now + Duration::seconds(30)))
            .live_vehicle(x1.clone(), None)
            .future_state(
                x1,
                VehicleState {
                    location: elsewhere,
                    ..state("lauv-xplore-1", now + Duration::seconds(20))
                },
            )
            // Not live, only known through its projection.
            .future_state(x2, state("lauv-xplore-2", now + Duration::seconds(5)))
            // Busy past the deadline.
            .future_state(x3, state("lauv-xplore-3", now + Duration::seconds(90)))
            .build(&[]);

        let ids: Vec<&str> = snapshot.vehicles().iter().map(|v| v.vehicle.id.as_str()).collect();
        assert_eq!(ids, vec!["lauv-xplore-1", "lauv-xplore-2"]);
        let v1 = &snapshot.vehicles()[0];
        assert!(v1.location.eq_approx(&elsewhere));
        assert!((v1.busy_for - 20.0).abs() < 1e-3);
        assert!(!snapshot.roster().contains_key(&Payload::Camera));
        assert_eq!(snapshot.roster()[&Payload::Sidescan][0].object, "x2_sidescan");
    }
}
