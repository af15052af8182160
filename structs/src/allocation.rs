use std::sync::mpsc;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::{payload::Payload, Location};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Move,
    Survey,
    Sample,
    Visit,
    /// Station keeping near another vehicle's survey to localize it.
    Locate,
}

/// Vertical reference of an action, in meters.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Z {
    Depth(f64),
    Altitude(f64),
}

/// One timed step of a vehicle's plan.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct PlannedAction {
    pub kind: ActionKind,
    /// Task served by this action, `None` for transits.
    pub task: Option<String>,
    pub location: Location,
    pub z: Z,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Payloads switched on for the action.
    pub payloads: Vec<Payload>,
}

/// A vehicle bound to an ordered task sequence.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct VehicleAllocation {
    pub plan_id: String,
    pub vehicle: String,
    pub tasks: Vec<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub actions: Vec<PlannedAction>,
}

impl VehicleAllocation {
    /// True when the vehicle assists another vehicle's task.
    pub fn supports_others(&self) -> bool {
        self.actions.iter().any(|a| a.kind == ActionKind::Locate)
    }
}

/// Decoded solver plan. Consumed once by the reconciler.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Solution {
    pub cost: Option<f64>,
    pub allocations: Vec<VehicleAllocation>,
}

impl Solution {
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.allocations
            .iter()
            .flat_map(|a| a.tasks.iter().map(|t| t.as_str()))
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum AllocationEvent {
    Allocated(VehicleAllocation),
    Cancelled { plan_id: String },
    Finished { plan_id: String },
    Interrupted { plan_id: String, vehicle: String },
    /// A requested planning cycle produced no plan.
    Failed { reason: String },
}

/// Console event bus, as far as the planner is concerned.
pub trait EventSink: Send + Sync {
    fn post(&self, event: AllocationEvent);
}

impl EventSink for mpsc::Sender<AllocationEvent> {
    fn post(&self, event: AllocationEvent) {
        if let Err(e) = self.send(event) {
            warn!("dropping allocation event, receiver gone: {:?}", e.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_wire_format() {
        let ev = AllocationEvent::Cancelled {
            plan_id: "mvplanner-004-x1".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"op":"cancelled","plan_id":"mvplanner-004-x1"}"#);

        let back: AllocationEvent =
            serde_json::from_str(r#"{"op":"interrupted","plan_id":"p","vehicle":"v"}"#).unwrap();
        assert_eq!(
            back,
            AllocationEvent::Interrupted {
                plan_id: "p".into(),
                vehicle: "v".into()
            }
        );
    }

    #[test]
    fn allocation_without_actions_still_parses() {
        let json = r#"{"op":"allocated","plan_id":"mvplanner-001-x1","vehicle":"lauv-xplore-1",
            "tasks":["t01"],"start_time":"2024-05-01T10:00:00Z"}"#;
        let AllocationEvent::Allocated(a) = serde_json::from_str(json).unwrap() else {
            panic!("expected allocation");
        };
        assert!(a.actions.is_empty());
        assert!(!a.supports_others());

        let z = serde_json::to_string(&Z::Altitude(10.0)).unwrap();
        assert_eq!(z, r#"{"altitude":10.0}"#);
    }
}
