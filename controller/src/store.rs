use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, info, warn};
use mvplan_structs::{
    allocation::{AllocationEvent, EventSink},
    geodesy::Geodesy,
    task::Task,
    tasklist,
    vehicle::{FutureStateEvent, VehicleState},
};

/// Task arena and per-vehicle state table shared by the console side and
/// the planning loop. Lives behind a single mutex.
#[derive(Debug, Default)]
pub struct MissionState {
    tasks: IndexMap<String, Task>,
    /// Where and when busy vehicles are expected to be free.
    future_states: BTreeMap<String, VehicleState>,
    task_counter: u32,
    cycle_counter: u64,
    last_reconciled_cycle: u64,
    tasks_file: Option<PathBuf>,
}

impl MissionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mission state persisted to `path` after every change of allocation.
    /// Tasks already saved there are loaded.
    pub fn with_tasks_file(path: impl Into<PathBuf>) -> Result<Self, mvplan_structs::Error> {
        let path = path.into();
        let mut state = Self::new();
        if path.exists() {
            for task in tasklist::load(&path)? {
                state.add_task(task);
            }
            info!("loaded {} tasks from {}", state.tasks.len(), path.display());
        }
        state.tasks_file = Some(path);
        Ok(state)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub(crate) fn task_mut(&mut self, name: &str) -> Option<&mut Task> {
        self.tasks.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Next free `tNN` name.
    pub fn next_name(&mut self) -> String {
        loop {
            self.task_counter += 1;
            let name = format!("t{:02}", self.task_counter);
            if !self.tasks.contains_key(&name) {
                return name;
            }
        }
    }

    /// Adds a task, renaming it if its name is empty or taken. Returns the
    /// name it was stored under.
    pub fn add_task(&mut self, mut task: Task) -> String {
        if task.name.trim().is_empty() || self.tasks.contains_key(&task.name) {
            let name = self.next_name();
            debug!("task '{}' stored as {}", task.name, name);
            task.name = name;
        }
        let name = task.name.clone();
        self.tasks.insert(name.clone(), task);
        name
    }

    pub fn remove_task(&mut self, name: &str) -> Option<Task> {
        self.tasks.shift_remove(name)
    }

    /// Releases every allocated task and publishes one cancellation per
    /// distinct plan. Returns the cancelled plan ids.
    pub fn cancel_allocations(&mut self, sink: &dyn EventSink) -> Vec<String> {
        let mut cancelled = BTreeSet::new();
        for task in self.tasks.values_mut() {
            if let Some(allocation) = task.clear_allocation() {
                cancelled.insert(allocation.id);
            }
        }
        for plan_id in cancelled.iter() {
            sink.post(AllocationEvent::Cancelled {
                plan_id: plan_id.clone(),
            });
        }
        cancelled.into_iter().collect()
    }

    /// Removes all tasks, cancelling their allocations first.
    pub fn clear(&mut self, sink: &dyn EventSink) {
        self.cancel_allocations(sink);
        self.tasks.clear();
    }

    /// Replaces the task list with the contents of `path`.
    pub fn load_tasks(&mut self, path: impl AsRef<Path>, sink: &dyn EventSink) -> Result<usize, mvplan_structs::Error> {
        let tasks = tasklist::load(path)?;
        self.clear(sink);
        let n = tasks.len();
        for task in tasks {
            self.add_task(task);
        }
        Ok(n)
    }

    pub fn save_tasks(&self, path: impl AsRef<Path>) -> Result<(), mvplan_structs::Error> {
        let tasks: Vec<Task> = self.tasks.values().cloned().collect();
        tasklist::save(path, &tasks)
    }

    /// Saves to the configured tasks file, if any.
    pub fn persist(&self) {
        if let Some(path) = self.tasks_file.as_ref() {
            if let Err(e) = self.save_tasks(path) {
                warn!("could not save tasks to {}: {}", path.display(), e);
            }
        }
    }

    /// Replaces unallocated surveys longer than `max_length` by their
    /// pieces, in place. Returns the number of tasks that were split.
    pub fn split_oversized(&mut self, max_length: f64, geo: &dyn Geodesy) -> usize {
        let mut split = 0;
        let mut taken: BTreeSet<String> = self.tasks.keys().cloned().collect();
        let mut tasks = IndexMap::with_capacity(self.tasks.len());
        for (name, task) in self.tasks.drain(..) {
            if task.is_allocated() || !task.geometry.is_survey() {
                tasks.insert(name, task);
                continue;
            }
            let pieces = task.split(max_length, geo);
            if pieces.len() > 1 {
                info!("split {} into {} pieces", name, pieces.len());
                split += 1;
            }
            for (i, mut piece) in pieces.into_iter().enumerate() {
                if i > 0 && taken.contains(&piece.name) {
                    let free = free_piece_name(&name, &taken);
                    debug!("{} exists, storing piece of {} as {}", piece.name, name, free);
                    piece.name = free;
                }
                taken.insert(piece.name.clone());
                tasks.insert(piece.name.clone(), piece);
            }
        }
        self.tasks = tasks;
        split
    }

    pub fn has_unallocated(&self) -> bool {
        self.tasks.values().any(|t| !t.is_allocated())
    }

    pub fn unallocated(&self) -> Vec<Task> {
        self.tasks.values().filter(|t| !t.is_allocated()).cloned().collect()
    }

    /// Tasks bound to `plan_id`.
    pub fn allocated_to(&self, plan_id: &str) -> Vec<String> {
        self.tasks
            .values()
            .filter(|t| t.allocation().map_or(false, |a| a.id == plan_id))
            .map(|t| t.name.clone())
            .collect()
    }

    /// Applies a projection update. A later projection replaces an
    /// earlier one; `None` withdraws the vehicle's entry. Returns whether
    /// the table changed.
    pub fn update_future_state(&mut self, event: FutureStateEvent) -> bool {
        let Some(state) = event.state else {
            return self.future_states.remove(&event.vehicle).is_some();
        };
        let replace = self
            .future_states
            .get(&event.vehicle)
            .map_or(true, |existing| state.time > existing.time);
        if replace {
            self.future_states.insert(event.vehicle, state);
        } else {
            debug!("ignoring older projection for {}", event.vehicle);
        }
        replace
    }

    /// Routes a projection received at `now`. A projection already reached
    /// is the vehicle's current state: the entry is dropped and the state
    /// handed back for the vehicle directory.
    pub fn apply_projection(&mut self, event: FutureStateEvent, now: DateTime<Utc>) -> Option<VehicleState> {
        if !event.state.as_ref().map_or(false, |s| s.time <= now) {
            self.update_future_state(event);
            return None;
        }
        self.future_states.remove(&event.vehicle);
        event.state
    }

    pub fn future_states(&self) -> impl Iterator<Item = &VehicleState> {
        self.future_states.values()
    }

    pub fn future_state(&self, vehicle: &str) -> Option<&VehicleState> {
        self.future_states.get(vehicle)
    }

    pub(crate) fn next_cycle(&mut self) -> u64 {
        self.cycle_counter += 1;
        self.cycle_counter
    }

    pub fn last_reconciled_cycle(&self) -> u64 {
        self.last_reconciled_cycle
    }

    pub(crate) fn set_last_reconciled_cycle(&mut self, cycle: u64) {
        self.last_reconciled_cycle = self.last_reconciled_cycle.max(cycle);
    }
}

fn free_piece_name(base: &str, taken: &BTreeSet<String>) -> String {
    let mut k = 2;
    loop {
        let name = format!("{}_p{}", base, k);
        if !taken.contains(&name) {
            return name;
        }
        k += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use mvplan_structs::{
        geodesy::FlatEarth,
        payload::Payload,
        task::{SurveyArea, TaskGeometry},
        Location,
    };
    use std::sync::mpsc;

    fn sample(name: &str) -> Task {
        Task::new(
            name,
            TaskGeometry::Sample {
                location: Location::new(41.18, -8.70),
            },
        )
    }

    fn state(vehicle: &str, secs: i64) -> VehicleState {
        VehicleState {
            vehicle: vehicle.into(),
            location: Location::new(41.18, -8.70),
            time: Utc::now() + Duration::seconds(secs),
            fuel: None,
        }
    }

    #[test]
    fn names_are_unique() {
        let mut s = MissionState::new();
        assert_eq!(s.add_task(sample("")), "t01");
        assert_eq!(s.add_task(sample("t02")), "t02");
        assert_eq!(s.add_task(sample("t02")), "t03");
        assert_eq!(s.next_name(), "t04");
        assert!(s.remove_task("t02").is_some());
        assert_eq!(s.tasks().map(|t| t.name.as_str()).collect::<Vec<_>>(), vec!["t01", "t03"]);
    }

    #[test]
    fn cancel_and_clear_publish_once_per_plan() {
        let (tx, rx) = mpsc::channel::<AllocationEvent>();
        let mut s = MissionState::new();
        for n in ["a", "b", "c"] {
            s.add_task(sample(n));
        }
        s.task_mut("a").unwrap().set_allocation("mvplanner-001-x1", "lauv-xplore-1");
        s.task_mut("b").unwrap().set_allocation("mvplanner-001-x1", "lauv-xplore-1");

        assert_eq!(s.cancel_allocations(&tx), vec!["mvplanner-001-x1"]);
        assert_eq!(s.len(), 3);
        assert!(!s.tasks().any(|t| t.is_allocated()));
        assert_eq!(rx.try_iter().count(), 1);

        s.task_mut("c").unwrap().set_allocation("mvplanner-002-x2", "lauv-xplore-2");
        s.clear(&tx);
        assert!(s.is_empty());
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![AllocationEvent::Cancelled {
                plan_id: "mvplanner-002-x2".into()
            }]
        );
    }

    #[test]
    fn future_state_upsert_rules() {
        let mut s = MissionState::new();
        let v = "lauv-xplore-1";
        assert!(s.update_future_state(FutureStateEvent {
            vehicle: v.into(),
            state: Some(state(v, 60)),
        }));
        // Older projection loses.
        assert!(!s.update_future_state(FutureStateEvent {
            vehicle: v.into(),
            state: Some(state(v, 30)),
        }));
        assert!(s.future_state(v).unwrap().time > Utc::now() + Duration::seconds(45));

        assert_eq!(s.future_states().count(), 1);

        assert!(s.update_future_state(FutureStateEvent {
            vehicle: v.into(),
            state: None
        }));
        assert_eq!(s.future_states().count(), 0);
    }

    #[test]
    fn reached_projection_becomes_current() {
        let mut s = MissionState::new();
        let v = "lauv-xplore-1";
        let ahead = FutureStateEvent {
            vehicle: v.into(),
            state: Some(state(v, 60)),
        };
        assert!(s.apply_projection(ahead, Utc::now()).is_none());
        assert!(s.future_state(v).is_some());

        let later = Utc::now() + Duration::seconds(120);
        let reached = FutureStateEvent {
            vehicle: v.into(),
            state: Some(state(v, 90)),
        };
        let current = s.apply_projection(reached, later).unwrap();
        assert_eq!(current.vehicle, v);
        assert!(s.future_state(v).is_none());

        let withdrawn = FutureStateEvent {
            vehicle: v.into(),
            state: None,
        };
        assert!(s.apply_projection(withdrawn, later).is_none());
    }

    #[test]
    fn oversized_surveys_split_in_place() {
        let mut s = MissionState::new();
        s.add_task(sample("t01"));
        s.add_task(
            Task::new(
                "t02",
                TaskGeometry::Area(SurveyArea {
                    center: Location::new(41.18, -8.70),
                    width: 20.0,
                    length: 1000.0,
                    bearing: 0.0,
                }),
            )
            .with_payloads([Payload::Sidescan]),
        );
        s.add_task(sample("t03"));

        assert_eq!(s.split_oversized(600.0, &FlatEarth), 1);
        let names: Vec<&str> = s.tasks().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["t01", "t02", "t02_p2", "t03"]);
        assert_eq!(s.split_oversized(600.0, &FlatEarth), 0);
    }

    #[test]
    fn split_pieces_never_replace_existing_tasks() {
        let mut s = MissionState::new();
        s.add_task(
            Task::new(
                "t02",
                TaskGeometry::Area(SurveyArea {
                    center: Location::new(41.18, -8.70),
                    width: 20.0,
                    length: 1000.0,
                    bearing: 0.0,
                }),
            )
            .with_payloads([Payload::Sidescan]),
        );
        s.add_task(sample("t02_p2"));
        s.task_mut("t02_p2").unwrap().set_allocation("mvplanner-001-x1", "lauv-xplore-1");

        assert_eq!(s.split_oversized(600.0, &FlatEarth), 1);
        assert_eq!(s.len(), 3);
        let kept = s.task("t02_p2").unwrap();
        assert!(!kept.geometry.is_survey());
        assert_eq!(kept.allocation().unwrap().id, "mvplanner-001-x1");
        assert!(s.task("t02_p3").unwrap().geometry.is_survey());
    }

    #[test]
    fn tasks_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mission.tasks");
        let mut s = MissionState::with_tasks_file(&path).unwrap();
        s.add_task(sample("t01").with_payloads([Payload::Ctd]));
        s.persist();

        let again = MissionState::with_tasks_file(&path).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again.task("t01").unwrap().payloads.len(), 1);

        let (tx, _rx) = mpsc::channel::<AllocationEvent>();
        let mut other = MissionState::new();
        other.add_task(sample("x"));
        assert_eq!(other.load_tasks(&path, &tx).unwrap(), 1);
        assert!(other.task("x").is_none());
    }
}
