use std::collections::BTreeSet;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    geodesy::{Coverage, Geodesy},
    payload::{survey_swath, Payload},
    Location,
};

const MAX_POLYGON_PIECES: usize = 32;

/// Rectangular survey footprint. Rows run parallel to `bearing` (degrees
/// clockwise from north) along `length`.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct SurveyArea {
    pub center: Location,
    pub width: f64,
    pub length: f64,
    pub bearing: f64,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaskGeometry {
    Area(SurveyArea),
    Polygon { vertices: Vec<Location> },
    Sample { location: Location },
}

impl TaskGeometry {
    pub fn is_survey(&self) -> bool {
        !matches!(self, TaskGeometry::Sample { .. })
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct TaskAllocation {
    pub id: String,
    pub vehicle: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Task {
    pub name: String,
    pub priority: bool,
    pub payloads: BTreeSet<Payload>,
    pub geometry: TaskGeometry,
    #[serde(default)]
    allocation: Option<TaskAllocation>,
}

impl Task {
    pub fn new(name: impl Into<String>, geometry: TaskGeometry) -> Self {
        Self {
            name: name.into(),
            priority: false,
            payloads: BTreeSet::new(),
            geometry,
            allocation: None,
        }
    }

    pub fn with_payloads(mut self, payloads: impl IntoIterator<Item = Payload>) -> Self {
        self.payloads = payloads.into_iter().collect();
        self
    }

    pub fn allocation(&self) -> Option<&TaskAllocation> {
        self.allocation.as_ref()
    }

    pub fn is_allocated(&self) -> bool {
        self.allocation.is_some()
    }

    /// Binds the task to an allocation. Refused if one is already live.
    pub fn set_allocation(&mut self, id: &str, vehicle: &str) -> bool {
        if self.allocation.is_some() {
            return false;
        }
        self.allocation = Some(TaskAllocation {
            id: id.to_string(),
            vehicle: vehicle.to_string(),
        });
        true
    }

    pub fn clear_allocation(&mut self) -> Option<TaskAllocation> {
        self.allocation.take()
    }

    /// Reference position: area center, polygon centroid or sample point.
    pub fn location(&self) -> Location {
        match &self.geometry {
            TaskGeometry::Area(area) => area.center,
            TaskGeometry::Sample { location } => *location,
            TaskGeometry::Polygon { vertices } => {
                let n = vertices.len().max(1) as f64;
                let (lat, lon) = vertices
                    .iter()
                    .fold((0.0, 0.0), |(lat, lon), v| (lat + v.lat, lon + v.lon));
                Location::new(lat / n, lon / n)
            }
        }
    }

    pub fn coverage(&self, geo: &dyn Geodesy) -> Coverage {
        geo.coverage(&self.geometry, survey_swath(&self.payloads))
    }

    /// Traversal length in meters; zero for samples.
    pub fn length(&self, geo: &dyn Geodesy) -> f64 {
        self.coverage(geo).length
    }

    /// Decomposes the task so that no piece is longer than `max_length`.
    /// The first piece keeps the task's name, the others are suffixed
    /// `_p2`, `_p3`, ... Tasks already within the limit come back unchanged.
    pub fn split(&self, max_length: f64, geo: &dyn Geodesy) -> Vec<Task> {
        let length = self.length(geo);
        if max_length <= 0.0 || length <= max_length {
            return vec![self.clone()];
        }

        let pieces: Vec<TaskGeometry> = match &self.geometry {
            TaskGeometry::Sample { .. } => return vec![self.clone()],
            TaskGeometry::Area(area) => {
                let n = ((length / max_length).round() as usize).max(1);
                if n == 1 {
                    return vec![self.clone()];
                }
                split_area(area, n, geo)
            }
            TaskGeometry::Polygon { vertices } => self.split_polygon(vertices, max_length, geo),
        };

        debug!("split {} (length {:.1}) into {} pieces", self.name, length, pieces.len());
        pieces
            .into_iter()
            .enumerate()
            .map(|(i, geometry)| Task {
                name: if i == 0 {
                    self.name.clone()
                } else {
                    format!("{}_p{}", self.name, i + 1)
                },
                priority: self.priority,
                payloads: self.payloads.clone(),
                geometry,
                allocation: None,
            })
            .collect()
    }

    fn split_polygon(&self, vertices: &[Location], max_length: f64, geo: &dyn Geodesy) -> Vec<TaskGeometry> {
        let swath = survey_swath(&self.payloads);
        let mut n = 2;
        loop {
            let pieces: Vec<TaskGeometry> = geo
                .split_polygon(vertices, n)
                .into_iter()
                .map(|vertices| TaskGeometry::Polygon { vertices })
                .collect();
            if pieces.iter().all(|p| geo.coverage(p, swath).length < max_length) {
                return pieces;
            }
            if n >= MAX_POLYGON_PIECES {
                warn!("{} still has pieces over {:.0} m after {} splits", self.name, max_length, n);
                return pieces;
            }
            n += 1;
        }
    }
}

/// Cuts a rectangle into `n` equal parts across its longer side.
fn split_area(area: &SurveyArea, n: usize, geo: &dyn Geodesy) -> Vec<TaskGeometry> {
    let b = area.bearing.to_radians();
    let along_length = area.length >= area.width;
    let (side, dir_n, dir_e) = if along_length {
        (area.length, b.cos(), b.sin())
    } else {
        (area.width, -b.sin(), b.cos())
    };
    let step = side / n as f64;

    (0..n)
        .map(|i| {
            let offset = -side / 2.0 + step / 2.0 + i as f64 * step;
            let center = geo.offset(&area.center, offset * dir_n, offset * dir_e);
            let (width, length) = if along_length {
                (area.width, step)
            } else {
                (step, area.length)
            };
            TaskGeometry::Area(SurveyArea {
                center,
                width,
                length,
                bearing: area.bearing,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::FlatEarth;

    fn strip(length: f64) -> Task {
        Task::new(
            "t01",
            TaskGeometry::Area(SurveyArea {
                center: Location::new(41.18, -8.70),
                width: 50.0,
                length,
                bearing: 30.0,
            }),
        )
        .with_payloads([Payload::Sidescan])
    }

    #[test]
    fn allocation_is_exclusive() {
        let mut t = strip(100.0);
        assert!(t.set_allocation("mvplanner-001-x1", "x1"));
        assert!(!t.set_allocation("mvplanner-002-x2", "x2"));
        assert_eq!(t.allocation().unwrap().vehicle, "x1");
        assert!(t.clear_allocation().is_some());
        assert!(!t.is_allocated());
    }

    #[test]
    fn split_under_ceiling_is_identity() {
        let geo = FlatEarth;
        let t = strip(500.0);
        let pieces = t.split(600.0, &geo);
        assert_eq!(pieces, vec![t]);
    }

    #[test]
    fn split_area_reconstructs_footprint() {
        let geo = FlatEarth;
        let t = strip(1000.0);
        assert!((t.length(&geo) - 1000.0).abs() < 1e-9);

        let pieces = t.split(600.0, &geo);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].name, "t01");
        assert_eq!(pieces[1].name, "t01_p2");

        let areas: Vec<SurveyArea> = pieces
            .iter()
            .map(|p| match &p.geometry {
                TaskGeometry::Area(a) => *a,
                _ => panic!("expected area"),
            })
            .collect();
        let total: f64 = areas.iter().map(|a| a.length).sum();
        assert!((total - 1000.0).abs() < 1e-9);
        for a in areas.iter() {
            assert_eq!(a.width, 50.0);
            assert_eq!(a.bearing, 30.0);
        }
        // Pieces are adjacent and centered on the original.
        assert!((geo.distance(&areas[0].center, &areas[1].center) - 500.0).abs() < 0.1);
        let mid = Location::new(
            0.5 * (areas[0].center.lat + areas[1].center.lat),
            0.5 * (areas[0].center.lon + areas[1].center.lon),
        );
        assert!(geo.distance(&mid, &Location::new(41.18, -8.70)) < 0.1);
        assert!(pieces.iter().all(|p| p.payloads == t.payloads));
    }

    #[test]
    fn split_polygon_until_short_enough() {
        let geo = FlatEarth;
        let origin = Location::new(41.18, -8.70);
        let vertices = vec![
            origin,
            geo.offset(&origin, 0.0, 400.0),
            geo.offset(&origin, 200.0, 400.0),
            geo.offset(&origin, 200.0, 0.0),
        ];
        let t = Task::new("t02", TaskGeometry::Polygon { vertices }).with_payloads([Payload::Multibeam]);
        assert!(t.length(&geo) > 1000.0);

        let pieces = t.split(1000.0, &geo);
        assert!(pieces.len() >= 2);
        assert!(pieces.iter().all(|p| p.length(&geo) < 1000.0));
        assert_eq!(pieces[0].name, "t02");
    }

    #[test]
    fn samples_never_split() {
        let geo = FlatEarth;
        let t = Task::new("t03", TaskGeometry::Sample { location: Location::new(41.0, -8.0) });
        assert_eq!(t.split(1.0, &geo).len(), 1);
    }
}
