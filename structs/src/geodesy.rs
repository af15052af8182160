use crate::{task::TaskGeometry, Location};

pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Traversal of a task geometry by a vehicle.
#[derive(Clone, Copy, Debug)]
pub struct Coverage {
    pub length: f64,
    pub entry: Location,
    pub exit: Location,
}

/// Distance, coverage path and area primitives the engine consumes.
pub trait Geodesy: Send + Sync {
    /// Horizontal distance in meters.
    fn distance(&self, a: &Location, b: &Location) -> f64;
    /// Location `north`/`east` meters from `origin`.
    fn offset(&self, origin: &Location, north: f64, east: f64) -> Location;
    /// (north, east) meters from `origin` to `to`.
    fn displacement(&self, origin: &Location, to: &Location) -> (f64, f64);
    fn coverage(&self, geometry: &TaskGeometry, swath: f64) -> Coverage;
    fn polygon_area(&self, vertices: &[Location]) -> f64;
    /// Splits a polygon into `pieces` parts of equal area.
    fn split_polygon(&self, vertices: &[Location], pieces: usize) -> Vec<Vec<Location>>;
}

/// Equirectangular approximation, adequate over a few kilometers.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatEarth;

impl Geodesy for FlatEarth {
    fn distance(&self, a: &Location, b: &Location) -> f64 {
        // Mean latitude keeps d(a, b) == d(b, a).
        let mean_lat = (0.5 * (a.lat + b.lat)).to_radians();
        let n = (b.lat - a.lat).to_radians() * EARTH_RADIUS;
        let e = (b.lon - a.lon).to_radians() * EARTH_RADIUS * mean_lat.cos();
        (n * n + e * e).sqrt()
    }

    fn offset(&self, origin: &Location, north: f64, east: f64) -> Location {
        let lat = origin.lat + (north / EARTH_RADIUS).to_degrees();
        let lon = origin.lon + (east / (EARTH_RADIUS * origin.lat.to_radians().cos())).to_degrees();
        Location { lat, lon }
    }

    fn displacement(&self, origin: &Location, to: &Location) -> (f64, f64) {
        let north = (to.lat - origin.lat).to_radians() * EARTH_RADIUS;
        let east = (to.lon - origin.lon).to_radians() * EARTH_RADIUS * origin.lat.to_radians().cos();
        (north, east)
    }

    fn coverage(&self, geometry: &TaskGeometry, swath: f64) -> Coverage {
        match geometry {
            TaskGeometry::Sample { location } => Coverage {
                length: 0.0,
                entry: *location,
                exit: *location,
            },
            TaskGeometry::Area(area) => {
                self.lawnmower(&area.center, area.width, area.length, area.bearing, swath)
            }
            TaskGeometry::Polygon { vertices } => {
                let Some(origin) = vertices.first() else {
                    return Coverage {
                        length: 0.0,
                        entry: Location::new(0.0, 0.0),
                        exit: Location::new(0.0, 0.0),
                    };
                };
                let pts = self.local(origin, vertices);
                let (min_n, max_n, min_e, max_e) = bounds(&pts);
                let center = self.offset(origin, (min_n + max_n) / 2.0, (min_e + max_e) / 2.0);
                // Rows run east-west across the bounding box.
                self.lawnmower(&center, max_n - min_n, max_e - min_e, 90.0, swath)
            }
        }
    }

    fn polygon_area(&self, vertices: &[Location]) -> f64 {
        match vertices.first() {
            Some(origin) => shoelace(&self.local(origin, vertices)).abs(),
            None => 0.0,
        }
    }

    fn split_polygon(&self, vertices: &[Location], pieces: usize) -> Vec<Vec<Location>> {
        let Some(origin) = vertices.first() else {
            return Vec::new();
        };
        if pieces <= 1 || vertices.len() < 3 {
            return vec![vertices.to_vec()];
        }

        let pts = self.local(origin, vertices);
        let (min_n, max_n, min_e, max_e) = bounds(&pts);
        // Cut across the longer axis. Work in (a, b) with `a` the cut axis.
        let cut_east = (max_e - min_e) >= (max_n - min_n);
        let ab: Vec<(f64, f64)> = pts
            .iter()
            .map(|&(n, e)| if cut_east { (e, n) } else { (n, e) })
            .collect();
        let (lo, hi) = if cut_east { (min_e, max_e) } else { (min_n, max_n) };
        let total = shoelace(&ab).abs();

        let mut cuts = vec![lo];
        for k in 1..pieces {
            let target = total * k as f64 / pieces as f64;
            let (mut a, mut b) = (lo, hi);
            for _ in 0..60 {
                let mid = 0.5 * (a + b);
                if shoelace(&clip(&ab, mid, true)).abs() < target {
                    a = mid;
                } else {
                    b = mid;
                }
            }
            cuts.push(0.5 * (a + b));
        }
        cuts.push(hi);

        cuts.windows(2)
            .map(|w| {
                let piece = clip(&clip(&ab, w[0], false), w[1], true);
                piece
                    .into_iter()
                    .map(|(a, b)| {
                        let (n, e) = if cut_east { (b, a) } else { (a, b) };
                        self.offset(origin, n, e)
                    })
                    .collect()
            })
            .collect()
    }
}

impl FlatEarth {
    fn local(&self, origin: &Location, vertices: &[Location]) -> Vec<(f64, f64)> {
        vertices.iter().map(|v| self.displacement(origin, v)).collect()
    }

    /// Boustrophedon over a rectangle: rows parallel to `bearing` (degrees
    /// clockwise from north), `swath` apart.
    fn lawnmower(&self, center: &Location, width: f64, length: f64, bearing: f64, swath: f64) -> Coverage {
        let swath = if swath > 0.0 { swath } else { crate::payload::DEFAULT_SWATH };
        let rows = ((width / swath).ceil() as usize).max(1);
        let b = bearing.to_radians();
        let (along_n, along_e) = (b.cos(), b.sin());
        let (across_n, across_e) = (-b.sin(), b.cos());
        let at = |along: f64, across: f64| {
            self.offset(
                center,
                along * along_n + across * across_n,
                along * along_e + across * across_e,
            )
        };

        let first_row = -((rows - 1) as f64) * swath / 2.0;
        let last_row = -first_row;
        let exit_along = if rows % 2 == 1 { length / 2.0 } else { -length / 2.0 };
        Coverage {
            length: rows as f64 * length + (rows - 1) as f64 * swath,
            entry: at(-length / 2.0, first_row),
            exit: at(exit_along, last_row),
        }
    }
}

fn bounds(pts: &[(f64, f64)]) -> (f64, f64, f64, f64) {
    pts.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(a, b, c, d), &(n, e)| (a.min(n), b.max(n), c.min(e), d.max(e)),
    )
}

fn shoelace(pts: &[(f64, f64)]) -> f64 {
    if pts.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..pts.len() {
        let (x1, y1) = pts[i];
        let (x2, y2) = pts[(i + 1) % pts.len()];
        sum += x1 * y2 - x2 * y1;
    }
    sum / 2.0
}

/// Sutherland-Hodgman against `a <= c` (`below`) or `a >= c`.
fn clip(pts: &[(f64, f64)], c: f64, below: bool) -> Vec<(f64, f64)> {
    let inside = |p: &(f64, f64)| if below { p.0 <= c } else { p.0 >= c };
    let mut out = Vec::new();
    for i in 0..pts.len() {
        let cur = pts[i];
        let prev = pts[(i + pts.len() - 1) % pts.len()];
        let cross = |p: (f64, f64), q: (f64, f64)| {
            let t = (c - p.0) / (q.0 - p.0);
            (c, p.1 + t * (q.1 - p.1))
        };
        match (inside(&prev), inside(&cur)) {
            (true, true) => out.push(cur),
            (true, false) => out.push(cross(prev, cur)),
            (false, true) => {
                out.push(cross(prev, cur));
                out.push(cur);
            }
            (false, false) => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::SurveyArea;

    fn square(geo: &FlatEarth, origin: &Location, side: f64) -> Vec<Location> {
        vec![
            *origin,
            geo.offset(origin, 0.0, side),
            geo.offset(origin, side, side),
            geo.offset(origin, side, 0.0),
        ]
    }

    #[test]
    fn offset_roundtrip() {
        let geo = FlatEarth;
        let origin = Location::new(41.18, -8.70);
        let p = geo.offset(&origin, 300.0, -400.0);
        assert!((geo.distance(&origin, &p) - 500.0).abs() < 0.1);
        assert_eq!(geo.distance(&origin, &p), geo.distance(&p, &origin));
    }

    #[test]
    fn single_row_area() {
        let geo = FlatEarth;
        let area = SurveyArea {
            center: Location::new(41.18, -8.70),
            width: 50.0,
            length: 1000.0,
            bearing: 0.0,
        };
        let cov = geo.coverage(&TaskGeometry::Area(area), 60.0);
        assert!((cov.length - 1000.0).abs() < 1e-9);
        assert!((geo.distance(&cov.entry, &cov.exit) - 1000.0).abs() < 1e-3);
    }

    #[test]
    fn multi_row_area() {
        let geo = FlatEarth;
        let area = SurveyArea {
            center: Location::new(41.18, -8.70),
            width: 100.0,
            length: 200.0,
            bearing: 45.0,
        };
        let cov = geo.coverage(&TaskGeometry::Area(area), 20.0);
        assert!((cov.length - (5.0 * 200.0 + 4.0 * 20.0)).abs() < 1e-9);
    }

    #[test]
    fn split_square_equal_area() {
        let geo = FlatEarth;
        let origin = Location::new(41.18, -8.70);
        let poly = square(&geo, &origin, 300.0);
        let total = geo.polygon_area(&poly);
        assert!((total - 90_000.0).abs() < 50.0);

        let pieces = geo.split_polygon(&poly, 3);
        assert_eq!(pieces.len(), 3);
        for piece in pieces.iter() {
            assert!((geo.polygon_area(piece) - total / 3.0).abs() < 1.0);
        }
    }
}
