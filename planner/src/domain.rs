use std::fmt::Write;

use mvplan_structs::allocation::Solution;
use serde::{Deserialize, Serialize};

use crate::{pddl, snapshot::ProblemSnapshot, DecodeError};

/// Which numeric model the problem is encoded in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainModel {
    /// Battery as a consumable resource, minimizing total time.
    V1,
    /// Time-away-from-depot ceiling, minimizing total time and depot returns.
    V2,
}

impl DomainModel {
    pub fn domain_name(&self) -> &'static str {
        match self {
            DomainModel::V1 => "mvplanner-energy",
            DomainModel::V2 => "mvplanner-depot",
        }
    }

    pub fn encoding(&self) -> &'static dyn DomainEncoding {
        match self {
            DomainModel::V1 => &EnergyBudget,
            DomainModel::V2 => &DepotReturn,
        }
    }
}

impl std::fmt::Display for DomainModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Encoder/decoder pair for one domain model. Only the numeric facts and
/// the metric differ between models; objects, distances, goals and plan
/// decoding are shared.
pub trait DomainEncoding: Send + Sync {
    fn model(&self) -> DomainModel;

    /// Appends the model-specific `:init` facts.
    fn numeric_facts(&self, snapshot: &ProblemSnapshot, out: &mut String);

    /// Expression to minimize.
    fn metric(&self, snapshot: &ProblemSnapshot) -> String;

    fn encode(&self, snapshot: &ProblemSnapshot) -> String {
        pddl::encode(self, snapshot)
    }

    fn decode(&self, snapshot: &ProblemSnapshot, text: &str) -> Result<Solution, DecodeError> {
        pddl::decode(snapshot, text)
    }
}

pub struct EnergyBudget;

impl DomainEncoding for EnergyBudget {
    fn model(&self) -> DomainModel {
        DomainModel::V1
    }

    fn numeric_facts(&self, snapshot: &ProblemSnapshot, out: &mut String) {
        for v in snapshot.vehicles() {
            // Watt-hours to joules.
            let level = v.vehicle.battery_capacity * 3600.0 * v.fuel_fraction;
            let _ = writeln!(out, "  (= (battery-level {}) {:.2})", v.object, level);
            let _ = writeln!(out, "  (= (battery-consumption-move {}) {:.2})", v.object, v.vehicle.move_power);
        }
        for instances in snapshot.roster().values() {
            for p in instances {
                let _ = writeln!(
                    out,
                    "  (= (battery-consumption-payload {}) {:.2})",
                    p.object,
                    p.payload.power_consumption()
                );
            }
        }
    }

    fn metric(&self, _snapshot: &ProblemSnapshot) -> String {
        "(total-time)".to_string()
    }
}

pub struct DepotReturn;

impl DomainEncoding for DepotReturn {
    fn model(&self) -> DomainModel {
        DomainModel::V2
    }

    fn numeric_facts(&self, snapshot: &ProblemSnapshot, out: &mut String) {
        let max_away = snapshot.params().seconds_away;
        for v in snapshot.vehicles() {
            let _ = writeln!(out, "  (= (from-depot {}) 0.00)", v.object);
            let _ = writeln!(out, "  (= (max-to-depot {}) {:.2})", v.object, max_away);
            if v.busy_for > 0.0 {
                let _ = writeln!(out, "  (at {:.2} (can-move {}))", v.busy_for, v.object);
            } else {
                let _ = writeln!(out, "  (can-move {})", v.object);
            }
        }
        let _ = writeln!(out, "  (= (depot-returns) 0)");
    }

    fn metric(&self, snapshot: &ProblemSnapshot) -> String {
        format!("(+ (total-time) (* {:.2} (depot-returns)))", snapshot.params().depot_return_weight)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::snapshot::{SnapshotBuilder, SnapshotParams};
    use chrono::{Duration, Utc};
    use mvplan_structs::{
        geodesy::{FlatEarth, Geodesy},
        payload::Payload,
        task::{SurveyArea, Task, TaskGeometry},
        vehicle::{FuelLevel, Vehicle, VehicleState},
        Location,
    };

    fn snapshot(model: DomainModel) -> ProblemSnapshot {
        let now = Utc::now();
        let here = Location::new(41.18, -8.70);
        let x1 = Vehicle::new("lauv-xplore-1", "x1", vec![Payload::Ctd]);
        let x2 = Vehicle::new("lauv-xplore-2", "x2", vec![Payload::Sidescan]);
        let params = SnapshotParams {
            model,
            ..Default::default()
        };
        SnapshotBuilder::new(&FlatEarth, 3, now, params)
            .live_vehicle(
                x1,
                Some(VehicleState {
                    vehicle: "lauv-xplore-1".into(),
                    location: here,
                    time: now,
                    fuel: Some(FuelLevel {
                        percent: 50.0,
                        time: now,
                    }),
                }),
            )
            .future_state(
                x2,
                VehicleState {
                    vehicle: "lauv-xplore-2".into(),
                    location: here,
                    time: now + Duration::seconds(42),
                    fuel: None,
                },
            )
            .build(&[Task::new("t01", TaskGeometry::Sample { location: here }).with_payloads([Payload::Ctd])])
    }

    const ENERGY_DOMAIN: &str = include_str!("../../conf/mvplanner/mvplanner-energy.pddl");
    const DEPOT_DOMAIN: &str = include_str!("../../conf/mvplanner/mvplanner-depot.pddl");

    fn without_comments(text: &str) -> String {
        text.lines()
            .map(|l| l.split(';').next().unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The balanced s-expression opening at `header`.
    fn section<'a>(text: &'a str, header: &str) -> &'a str {
        let body = &text[text.find(header).unwrap_or_else(|| panic!("no {}", header))..];
        let mut depth = 0;
        for (i, c) in body.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return &body[..=i];
                    }
                }
                _ => {}
            }
        }
        body
    }

    /// Names in head position, e.g. `at` in `(at x1 x1_depot)`.
    fn heads(text: &str) -> BTreeSet<String> {
        text.split('(')
            .skip(1)
            .filter_map(|s| s.split(|c: char| c.is_whitespace() || c == ')').next())
            .filter(|t| !t.is_empty() && !t.starts_with(':'))
            .map(|t| t.to_string())
            .collect()
    }

    fn rich_snapshot(model: DomainModel) -> ProblemSnapshot {
        let now = Utc::now();
        let here = Location::new(41.18, -8.70);
        let there = FlatEarth.offset(&here, 0.0, 400.0);
        let tasks = [
            Task::new("t01", TaskGeometry::Sample { location: here }).with_payloads([Payload::Ctd]),
            Task::new(
                "t02",
                TaskGeometry::Area(SurveyArea {
                    center: there,
                    width: 60.0,
                    length: 200.0,
                    bearing: 0.0,
                }),
            )
            .with_payloads([Payload::Sidescan, Payload::Multibeam]),
            Task::new("t03", TaskGeometry::Sample { location: there }),
            Task::new(
                "t04",
                TaskGeometry::Area(SurveyArea {
                    center: here,
                    width: 40.0,
                    length: 100.0,
                    bearing: 90.0,
                }),
            ),
        ];
        let params = SnapshotParams {
            model,
            ..Default::default()
        };
        SnapshotBuilder::new(&FlatEarth, 4, now, params)
            .live_vehicle(Vehicle::new("lauv-xplore-1", "x1", vec![Payload::Ctd]), None)
            .live_vehicle(
                Vehicle::new("lauv-xplore-2", "x2", vec![Payload::Sidescan, Payload::Multibeam]),
                None,
            )
            .future_state(
                Vehicle::new("lauv-seacon-2", "s2", vec![]),
                VehicleState {
                    vehicle: "lauv-seacon-2".into(),
                    location: here,
                    time: now + Duration::seconds(30),
                    fuel: None,
                },
            )
            .build(&tasks)
    }

    #[test]
    fn problems_only_use_declared_names() {
        for (model, domain) in [(DomainModel::V1, ENERGY_DOMAIN), (DomainModel::V2, DEPOT_DOMAIN)] {
            let domain = without_comments(domain);
            assert!(domain.contains(&format!("(define (domain {})", model.domain_name())));
            let declared: BTreeSet<String> = heads(section(&domain, "(:predicates"))
                .into_iter()
                .chain(heads(section(&domain, "(:functions")))
                .collect();
            let types: BTreeSet<&str> = section(&domain, "(:types").split_whitespace().collect();

            let problem = model.encoding().encode(&rich_snapshot(model));
            let builtin = ["=", "and", "+", "*", "total-time"];
            let used: BTreeSet<String> = heads(section(&problem, "(:init"))
                .into_iter()
                .chain(heads(section(&problem, "(:goal")))
                .chain(heads(section(&problem, "(:metric")))
                .filter(|h| !builtin.contains(&h.as_str()))
                .collect();
            assert!(used.contains("collected") && used.contains("visited"));
            for name in &used {
                assert!(declared.contains(name), "{} uses undeclared {}", model, name);
            }

            for line in section(&problem, "(:objects").lines().skip(1) {
                if let Some((_, kind)) = line.split_once(" - ") {
                    let kind = kind.trim();
                    assert!(types.contains(kind), "{} has no type {}", model, kind);
                }
            }
        }
    }

    #[test]
    fn energy_budget_facts() {
        let s = snapshot(DomainModel::V1);
        let text = DomainModel::V1.encoding().encode(&s);
        assert!(text.contains("(:domain mvplanner-energy)"));
        assert!(text.contains("(= (battery-level x1) 1800000.00)"));
        assert!(text.contains("(= (battery-level x2) 3600000.00)"));
        assert!(text.contains("(= (battery-consumption-payload x1_ctd) 5.00)"));
        assert!(text.contains("(:metric minimize (total-time))"));
        assert!(!text.contains("can-move"));
    }

    #[test]
    fn depot_return_facts() {
        let s = snapshot(DomainModel::V2);
        let text = DomainModel::V2.encoding().encode(&s);
        assert!(text.contains("(:domain mvplanner-depot)"));
        assert!(text.contains("(= (max-to-depot x1) 1000.00)"));
        assert!(text.contains("(can-move x1)"));
        assert!(text.contains("(at 42.00 (can-move x2))"));
        assert!(text.contains("(= (depot-returns) 0)"));
        assert!(text.contains("(:metric minimize (+ (total-time) (* 100.00 (depot-returns))))"));
        assert!(!text.contains("battery"));
    }
}
