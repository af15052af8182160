use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use mvplan_structs::allocation::{AllocationEvent, EventSink, Solution, VehicleAllocation};

use crate::{store::MissionState, PlanningError};

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Allocations bound to tasks and published.
    pub applied: Vec<VehicleAllocation>,
    /// Allocations starting after the next planning deadline.
    pub late: Vec<VehicleAllocation>,
    /// Tasks named by the solution that were gone or already allocated.
    pub skipped_tasks: Vec<String>,
}

/// Binds the allocations of `solution`, planned in `cycle`, to the live
/// tasks. Solutions from a cycle older than one already reconciled are
/// discarded whole. With a `deadline`, allocations starting after it are
/// left for the next cycle.
pub fn apply(
    state: &mut MissionState,
    solution: Solution,
    cycle: u64,
    deadline: Option<DateTime<Utc>>,
    sink: &dyn EventSink,
) -> Result<ReconcileOutcome, PlanningError> {
    let newer = state.last_reconciled_cycle();
    if cycle < newer {
        info!("discarding solution of cycle {}, cycle {} already allocated", cycle, newer);
        return Err(PlanningError::Superseded { cycle, newer });
    }
    state.set_last_reconciled_cycle(cycle);

    let mut outcome = ReconcileOutcome::default();
    let mut pending = Vec::new();
    let mut bound_here = BTreeSet::new();
    for mut allocation in solution.allocations {
        if let Some(deadline) = deadline {
            if allocation.start_time > deadline {
                info!(
                    "ignoring allocation for {}: starts {} after next allocation at {}",
                    allocation.vehicle, allocation.start_time, deadline
                );
                outcome.late.push(allocation);
                continue;
            }
        }

        let mut bound = Vec::new();
        for name in allocation.tasks.drain(..) {
            let Some(task) = state.task_mut(&name) else {
                warn!("{} is gone, not adding it to {}", name, allocation.plan_id);
                outcome.skipped_tasks.push(name);
                continue;
            };
            if task.set_allocation(&allocation.plan_id, &allocation.vehicle) {
                bound.push(name);
            } else {
                warn!(
                    "{} already allocated to {:?}, not adding it to {}",
                    name,
                    task.allocation().map(|a| &a.id),
                    allocation.plan_id
                );
                outcome.skipped_tasks.push(name);
            }
        }
        bound_here.extend(bound.iter().cloned());
        allocation.tasks = bound;
        pending.push(allocation);
    }

    // Work on tasks bound elsewhere is dropped, and so is a helper whose
    // supported task did not make it.
    for mut allocation in pending {
        allocation
            .actions
            .retain(|a| a.task.as_ref().map_or(true, |t| bound_here.contains(t)));
        if allocation.tasks.is_empty() && !allocation.supports_others() {
            continue;
        }
        debug!("{} -> {} {:?}", allocation.plan_id, allocation.vehicle, allocation.tasks);
        sink.post(AllocationEvent::Allocated(allocation.clone()));
        outcome.applied.push(allocation);
    }

    if !outcome.applied.is_empty() {
        state.persist();
    }
    Ok(outcome)
}

/// Applies a lifecycle event from the console. Returns the affected tasks.
pub fn on_event(state: &mut MissionState, event: &AllocationEvent, sink: &dyn EventSink) -> Vec<String> {
    match event {
        AllocationEvent::Finished { plan_id } => {
            let done = state.allocated_to(plan_id);
            for name in done.iter() {
                state.remove_task(name);
            }
            info!("{} finished, removed {:?}", plan_id, done);
            if !done.is_empty() {
                state.persist();
            }
            done
        }
        AllocationEvent::Interrupted { plan_id, vehicle } => {
            let released = release(state, plan_id);
            if !released.is_empty() {
                info!("{} interrupted {}, released {:?}", vehicle, plan_id, released);
                sink.post(AllocationEvent::Cancelled {
                    plan_id: plan_id.clone(),
                });
                state.persist();
            }
            released
        }
        AllocationEvent::Cancelled { plan_id } => {
            let released = release(state, plan_id);
            if !released.is_empty() {
                info!("{} cancelled, released {:?}", plan_id, released);
                state.persist();
            }
            released
        }
        AllocationEvent::Allocated(_) | AllocationEvent::Failed { .. } => Vec::new(),
    }
}

fn release(state: &mut MissionState, plan_id: &str) -> Vec<String> {
    let names = state.allocated_to(plan_id);
    for name in names.iter() {
        if let Some(task) = state.task_mut(name) {
            task.clear_allocation();
        }
    }
    names
}
