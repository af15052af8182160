//! Problem text shared by both domain models, and the plan decoder.
//!
//! Plans come back one grounded action per line:
//!
//! ```text
//! ; comments
//! 0.000: (MOVE X1 X1_DEPOT T01_ENTRY) [D:120.00; C:1.00]
//! 120.001: (SURVEY-ONE-PAYLOAD X1 T01_ENTRY T01_EXIT T01 X1_SIDESCAN T01_SIDESCAN SIDESCAN) [500.00]
//! ```

use std::{collections::BTreeSet, fmt::Write};

use chrono::{DateTime, Duration, Utc};
use log::{debug, trace};
use mvplan_structs::{
    allocation::{ActionKind, PlannedAction, Solution, VehicleAllocation, Z},
    payload::{operating_z, Payload, DEFAULT_DEPTH},
    Location,
};

use crate::{
    domain::DomainEncoding,
    snapshot::{ProblemSnapshot, SnapshotVehicle},
    DecodeError,
};

const LOCATION_SUFFIXES: [&str; 4] = ["_entry", "_exit", "_oi", "_depot"];

pub fn encode<E: DomainEncoding + ?Sized>(encoding: &E, snapshot: &ProblemSnapshot) -> String {
    #[cfg(feature = "prof")]
    let _p = hprof::enter("encode");

    let mut out = String::new();
    let _ = writeln!(out, "(define (problem mvplanner-{:03})", snapshot.cycle());
    let _ = writeln!(out, "(:domain {})", encoding.model().domain_name());
    write_objects(snapshot, &mut out);

    out.push_str("(:init\n");
    write_shared_facts(snapshot, &mut out);
    encoding.numeric_facts(snapshot, &mut out);
    out.push_str(")\n");

    out.push_str("(:goal (and\n");
    for task in snapshot.tasks() {
        if task.task.payloads.is_empty() {
            let _ = writeln!(out, "  (visited {})", task.object);
        }
        for (data, _) in task.data_objects() {
            let _ = writeln!(out, "  (collected {})", data);
        }
    }
    out.push_str("))\n");
    let _ = writeln!(out, "(:metric minimize {})", encoding.metric(snapshot));
    out.push_str(")\n");
    out
}

fn write_group(out: &mut String, names: impl IntoIterator<Item = String>, kind: &str) {
    let names: Vec<String> = names.into_iter().collect();
    if !names.is_empty() {
        let _ = writeln!(out, "  {} - {}", names.join(" "), kind);
    }
}

fn write_objects(snapshot: &ProblemSnapshot, out: &mut String) {
    out.push_str("(:objects\n");
    write_group(out, snapshot.vehicles().iter().map(|v| v.object.clone()), "vehicle");
    write_group(out, snapshot.locations().iter().map(|(n, _)| n.clone()), "location");
    write_group(out, snapshot.surveys().iter().map(|t| t.object.clone()), "survey");
    write_group(out, snapshot.samples().iter().map(|t| t.object.clone()), "sample");

    let kinds: BTreeSet<_> = snapshot
        .roster()
        .keys()
        .copied()
        .chain(snapshot.tasks().flat_map(|t| t.task.payloads.iter().copied()))
        .collect();
    write_group(out, kinds.iter().map(|k| k.name().to_string()), "kind");
    write_group(
        out,
        snapshot.roster().values().flatten().map(|p| p.object.clone()),
        "payload",
    );
    write_group(
        out,
        snapshot.tasks().flat_map(|t| t.data_objects().map(|(d, _)| d)),
        "data",
    );
    out.push_str(")\n");
}

fn write_shared_facts(snapshot: &ProblemSnapshot, out: &mut String) {
    for v in snapshot.vehicles() {
        let depot = v.depot();
        let _ = writeln!(out, "  (at {} {})", v.object, depot);
        let _ = writeln!(out, "  (base {} {})", v.object, depot);
        let _ = writeln!(out, "  (= (speed {}) {:.2})", v.object, v.vehicle.speed);
    }
    for instances in snapshot.roster().values() {
        for p in instances {
            if let Some(v) = snapshot.vehicles().iter().find(|v| v.vehicle.id == p.vehicle) {
                let _ = writeln!(out, "  (having {} {})", p.object, v.object);
            }
            let _ = writeln!(out, "  (kind-of {} {})", p.object, p.payload);
        }
    }
    for t in snapshot.surveys() {
        let _ = writeln!(out, "  (entry {} {}_entry)", t.object, t.object);
        let _ = writeln!(out, "  (exit {} {}_exit)", t.object, t.object);
        let _ = writeln!(out, "  (= (surveillance-distance {}) {:.2})", t.object, t.length);
    }
    for t in snapshot.samples() {
        let _ = writeln!(out, "  (sample-point {} {}_oi)", t.object, t.object);
    }
    for t in snapshot.tasks() {
        for (data, payload) in t.data_objects() {
            let _ = writeln!(out, "  (data-of {} {})", data, t.object);
            let _ = writeln!(out, "  (data-kind {} {})", data, payload);
        }
    }
    for ((a, b), d) in snapshot.distances() {
        let _ = writeln!(out, "  (= (distance {} {}) {:.2})", a, b, d);
    }
}

/// Plans never schedule further than this (s) from the problem time.
const MAX_PLAN_SECS: f64 = 1.0e8;

/// One grounded action of a plan.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanAction {
    pub start: f64,
    pub duration: Option<f64>,
    pub action: String,
    pub args: Vec<String>,
}

fn plan_seconds(field: &str) -> Option<f64> {
    field
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && (0.0..=MAX_PLAN_SECS).contains(v))
}

impl PlanAction {
    pub fn end(&self) -> f64 {
        self.start + self.duration.unwrap_or(0.0)
    }

    /// Action family, e.g. `survey` for `survey-two-payload`.
    pub fn kind(&self) -> &str {
        self.action.split('-').next().unwrap_or(&self.action)
    }

    /// `None` unless the line is an action with times within plan range.
    pub fn parse(line: &str) -> Option<PlanAction> {
        let line = line.trim().to_lowercase();
        let (head, bracket) = match line.find('[') {
            Some(i) => (&line[..i], Some(&line[i + 1..])),
            None => (line.as_str(), None),
        };
        let mut parts = head
            .split(|c: char| c == ':' || c == '(' || c == ')' || c.is_whitespace())
            .filter(|p| !p.is_empty());
        let start = plan_seconds(parts.next()?)?;
        let action = parts.next()?.to_string();
        let args: Vec<String> = parts.map(|p| p.to_string()).collect();

        let duration = match bracket {
            Some(b) => {
                let inner = b.split(']').next()?;
                let first = inner.split(';').next()?.trim();
                let value = first.strip_prefix("d:").unwrap_or(first).trim();
                Some(plan_seconds(value)?)
            }
            None => None,
        };

        Some(PlanAction {
            start,
            duration,
            action,
            args,
        })
    }
}

fn plan_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with(';'))
}

/// End time of the last action in the plan, `None` when it does not parse.
pub fn solution_cost(text: &str) -> Option<f64> {
    let last = plan_lines(text).last()?;
    PlanAction::parse(last).map(|a| a.end())
}

fn task_object(arg: &str) -> &str {
    LOCATION_SUFFIXES
        .iter()
        .find_map(|s| arg.strip_suffix(s))
        .unwrap_or(arg)
}

struct Sequence<'a> {
    object: &'a str,
    vehicle: &'a str,
    first_start: DateTime<Utc>,
    tasks: Vec<String>,
    actions: Vec<PlannedAction>,
}

fn sequence<'s, 'v>(
    sequences: &'v mut Vec<Sequence<'s>>,
    vehicle: &'s SnapshotVehicle,
    start: DateTime<Utc>,
) -> &'v mut Sequence<'s> {
    let idx = match sequences.iter().position(|s| s.object == vehicle.object) {
        Some(i) => i,
        None => {
            sequences.push(Sequence {
                object: &vehicle.object,
                vehicle: &vehicle.vehicle.id,
                first_start: start,
                tasks: Vec::new(),
                actions: Vec::new(),
            });
            sequences.len() - 1
        }
    };
    let seq = &mut sequences[idx];
    seq.first_start = seq.first_start.min(start);
    seq
}

fn vehicle<'s>(snapshot: &'s ProblemSnapshot, object: &str) -> Result<&'s SnapshotVehicle, DecodeError> {
    snapshot
        .vehicle_by_object(object)
        .ok_or_else(|| DecodeError::UnknownVehicle(object.to_string()))
}

fn location(snapshot: &ProblemSnapshot, name: &str) -> Result<Location, DecodeError> {
    snapshot
        .location(name)
        .ok_or_else(|| DecodeError::UnknownLocation(name.to_string()))
}

fn offset(snapshot: &ProblemSnapshot, secs: f64) -> Option<DateTime<Utc>> {
    snapshot
        .time()
        .checked_add_signed(Duration::milliseconds((secs * 1000.0).round() as i64))
}

/// Turns solver output into one allocation per vehicle that was given at
/// least one task or assists another vehicle. Task order follows the plan;
/// vehicles are listed in order of first appearance.
pub fn decode(snapshot: &ProblemSnapshot, text: &str) -> Result<Solution, DecodeError> {
    let mut sequences: Vec<Sequence> = Vec::new();
    for line in plan_lines(text) {
        let malformed = || DecodeError::Malformed(line.to_string());
        let action = PlanAction::parse(line).ok_or_else(malformed)?;
        if action.kind() == "getready" {
            continue;
        }
        let n = action.args.len();
        if n < 2 {
            return Err(malformed());
        }
        let actor = vehicle(snapshot, &action.args[0])?;
        trace!("{} at {:.2}: {} {:?}", actor.object, action.start, action.action, action.args);

        let kind = match action.kind() {
            "move" => ActionKind::Move,
            "survey" | "collab" => ActionKind::Survey,
            "sample" => ActionKind::Sample,
            "visit" => ActionKind::Visit,
            _ => return Err(malformed()),
        };
        let start = offset(snapshot, action.start).ok_or_else(malformed)?;
        let end = offset(snapshot, action.end()).ok_or_else(malformed)?;

        let (task, place) = if kind == ActionKind::Move {
            (None, action.args.get(2).ok_or_else(malformed)?)
        } else {
            let object = task_object(&action.args[1]);
            let task = snapshot
                .task_by_object(object)
                .ok_or_else(|| DecodeError::UnknownTask(object.to_string()))?;
            (Some(task), &action.args[1])
        };
        let z = match task {
            Some(t) => operating_z(&t.task.payloads),
            None => Z::Depth(DEFAULT_DEPTH),
        };
        let payloads: Vec<Payload> = action
            .args
            .iter()
            .filter_map(|a| snapshot.payload_instance(a))
            .filter(|p| p.vehicle == actor.vehicle.id)
            .map(|p| p.payload)
            .collect();
        let task_name = task.map(|t| t.task.name.clone());

        let seq = sequence(&mut sequences, actor, start);
        if let Some(name) = task_name.as_ref() {
            if !seq.tasks.contains(name) {
                seq.tasks.push(name.clone());
            }
        }
        seq.actions.push(PlannedAction {
            kind,
            task: task_name.clone(),
            location: location(snapshot, place)?,
            z,
            start,
            end,
            payloads,
        });

        if action.action.starts_with("collab") {
            // Helper vehicle and its station close the argument list.
            if n < 4 {
                return Err(malformed());
            }
            let helper = vehicle(snapshot, &action.args[n - 2])?;
            let station = location(snapshot, &action.args[n - 1])?;
            sequence(&mut sequences, helper, start).actions.push(PlannedAction {
                kind: ActionKind::Locate,
                task: task_name,
                location: station,
                z: Z::Depth(0.0),
                start,
                end,
                payloads: Vec::new(),
            });
        }
    }

    let allocations: Vec<VehicleAllocation> = sequences
        .into_iter()
        .filter(|s| !s.tasks.is_empty() || s.actions.iter().any(|a| a.kind == ActionKind::Locate))
        .map(|mut s| {
            s.actions.sort_by_key(|a| a.start);
            VehicleAllocation {
                plan_id: plan_id(snapshot.cycle(), s.object),
                vehicle: s.vehicle.to_string(),
                tasks: s.tasks,
                start_time: s.first_start,
                actions: s.actions,
            }
        })
        .collect();

    debug!("decoded {} allocations for cycle {}", allocations.len(), snapshot.cycle());
    Ok(Solution {
        cost: solution_cost(text),
        allocations,
    })
}

pub fn plan_id(cycle: u64, vehicle_object: &str) -> String {
    format!("mvplanner-{:03}-{}", cycle, vehicle_object)
}
