use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use mvplan_planner::{search, SearchProgress, SnapshotBuilder, SolverRunner};
use mvplan_structs::{
    allocation::{AllocationEvent, EventSink},
    geodesy::Geodesy,
    vehicle::VehicleDirectory,
};
use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::PlannerConfig,
    reconcile::{self, ReconcileOutcome},
    store::MissionState,
    PlanningError,
};

/// The planning loop. Checks eligibility on every tick and runs at most one
/// planning cycle at a time, each on its own task.
#[derive(Clone)]
pub struct Executive {
    inner: Arc<Inner>,
}

struct Inner {
    config: PlannerConfig,
    state: Arc<Mutex<MissionState>>,
    directory: Arc<dyn VehicleDirectory>,
    geo: Arc<dyn Geodesy>,
    sink: Arc<dyn EventSink>,
    runner: SolverRunner,
    progress: watch::Sender<SearchProgress>,
    last_allocation: Mutex<DateTime<Utc>>,
    current: Mutex<Option<CancellationToken>>,
}

impl Executive {
    pub fn new(
        config: PlannerConfig,
        state: MissionState,
        directory: Arc<dyn VehicleDirectory>,
        geo: Arc<dyn Geodesy>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (progress, _) = watch::channel(SearchProgress::default());
        Self {
            inner: Arc::new(Inner {
                runner: SolverRunner::new(config.solver.clone()),
                config,
                state: Arc::new(Mutex::new(state)),
                directory,
                geo,
                sink,
                progress,
                last_allocation: Mutex::new(Utc::now()),
                current: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> Arc<Mutex<MissionState>> {
        self.inner.state.clone()
    }

    pub fn sink(&self) -> &dyn EventSink {
        self.inner.sink.as_ref()
    }

    pub fn progress(&self) -> watch::Receiver<SearchProgress> {
        self.inner.progress.subscribe()
    }

    /// Decides whether a cycle is due at `now`: the allocation interval has
    /// elapsed, some task is unallocated and some active vehicle will be
    /// free before the next allocation. Returns that next allocation time.
    pub fn check(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let interval = self.inner.config.allocation_interval();
        {
            let mut last = self.inner.last_allocation.lock();
            if now - *last < interval {
                return None;
            }
            *last = now;
        }
        let deadline = now + interval;

        let state = self.inner.state.lock();
        if !state.has_unallocated() {
            info!("not planning: no tasks left for allocation");
            return None;
        }
        let available = self
            .inner
            .directory
            .active_vehicles()
            .into_iter()
            .filter(|v| state.future_state(&v.id).map_or(true, |f| f.time <= deadline))
            .count();
        if available == 0 {
            info!("not planning: no vehicle would be free before {}", deadline);
            return None;
        }
        Some(deadline)
    }

    /// One iteration of the loop. Spawns a cycle when one is due and
    /// automatic execution is on.
    pub fn tick(&self, now: DateTime<Utc>) -> Option<JoinHandle<()>> {
        let deadline = self.check(now)?;
        if !self.inner.config.auto_exec {
            return None;
        }
        Some(self.spawn_cycle(Some(deadline)))
    }

    /// Starts a planning cycle in the background, cancelling the one
    /// still running.
    pub fn spawn_cycle(&self, deadline: Option<DateTime<Utc>>) -> JoinHandle<()> {
        let token = self.replace_current();
        let exec = self.clone();
        tokio::spawn(async move {
            match exec.plan_once(deadline, &token).await {
                Ok(outcome) => info!(
                    "cycle done: {} allocations, {} left for later",
                    outcome.applied.len(),
                    outcome.late.len()
                ),
                Err(PlanningError::NoSolution) => warn!("no solution this cycle"),
                Err(e) => warn!("planning cycle failed: {}", e),
            }
        })
    }

    /// Plans right away, without the allocation deadline. A failed search is
    /// returned to the caller and also published as a failure event.
    pub async fn plan_interactive(&self) -> Result<ReconcileOutcome, PlanningError> {
        let token = self.replace_current();
        let result = self.plan_once(None, &token).await;
        if let Err(e) = result.as_ref() {
            if e.is_search_failure() {
                self.inner.sink.post(AllocationEvent::Failed { reason: e.to_string() });
            }
        }
        result
    }

    fn replace_current(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.current.lock().replace(token.clone()) {
            debug!("cancelling previous planning cycle");
            previous.cancel();
        }
        token
    }

    /// Snapshot under the lock, solve outside it, reconcile under it again.
    pub async fn plan_once(
        &self,
        deadline: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, PlanningError> {
        let inner = &self.inner;
        let config = &inner.config;

        let (cycle, snapshot) = {
            let mut state = inner.state.lock();
            state.split_oversized(config.survey_max_length, inner.geo.as_ref());
            let cycle = state.next_cycle();

            let mut builder = SnapshotBuilder::new(inner.geo.as_ref(), cycle, Utc::now(), config.snapshot_params())
                .deadline(deadline);
            for vehicle in inner.directory.active_vehicles() {
                let current = inner.directory.current_state(&vehicle.id);
                builder = builder.live_vehicle(vehicle, current);
            }
            for future in state.future_states() {
                match inner.directory.vehicle(&future.vehicle) {
                    Some(vehicle) => builder = builder.future_state(vehicle, future.clone()),
                    None => warn!("projection for unknown vehicle {}", future.vehicle),
                }
            }
            (cycle, builder.build(&state.unallocated()))
        };

        if snapshot.is_empty() || snapshot.vehicles().is_empty() {
            return Err(PlanningError::NothingToPlan);
        }
        info!(
            "cycle {}: planning {} tasks for {} vehicles ({})",
            cycle,
            snapshot.tasks().count(),
            snapshot.vehicles().len(),
            snapshot.model()
        );

        let encoding = snapshot.model().encoding();
        let problem = encoding.encode(&snapshot);
        let text = search(
            &inner.runner,
            snapshot.model(),
            &problem,
            config.search_mode(),
            Some(cancel),
            Some(&inner.progress),
        )
        .await?
        .ok_or(PlanningError::NoSolution)?;

        let solution = encoding.decode(&snapshot, &text)?;
        debug!("cycle {} solution cost {:?}", cycle, solution.cost);

        let deadline = if config.auto_exec { deadline } else { None };
        let mut state = inner.state.lock();
        reconcile::apply(&mut state, solution, cycle, deadline, inner.sink.as_ref())
    }

    /// Runs the eligibility check every `tick_millis` until `shutdown`.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(self.inner.config.tick_millis));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick(Utc::now());
                }
            }
        }
        if let Some(token) = self.inner.current.lock().take() {
            token.cancel();
        }
        info!("planning loop stopped");
    }
}
