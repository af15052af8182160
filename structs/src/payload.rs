use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{allocation::Z, Error};

/// Swath used for coverage paths when no required payload has one.
pub const DEFAULT_SWATH: f64 = 20.0;

/// Depth (m) of transits and of work with depth-rated payloads.
pub const DEFAULT_DEPTH: f64 = 3.0;

/// Sensor or actuator a task may require from a vehicle.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    Sidescan,
    Multibeam,
    Camera,
    Ctd,
    Rhodamine,
    Edgetech,
}

impl Payload {
    pub const ALL: [Payload; 6] = [
        Payload::Sidescan,
        Payload::Multibeam,
        Payload::Camera,
        Payload::Ctd,
        Payload::Rhodamine,
        Payload::Edgetech,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Payload::Sidescan => "sidescan",
            Payload::Multibeam => "multibeam",
            Payload::Camera => "camera",
            Payload::Ctd => "ctd",
            Payload::Rhodamine => "rhodamine",
            Payload::Edgetech => "edgetech",
        }
    }

    /// Width (m) covered by one survey row, zero for point sensors.
    pub fn swath_width(&self) -> f64 {
        match self {
            Payload::Sidescan => 60.0,
            Payload::Multibeam => 40.0,
            Payload::Camera => 5.0,
            Payload::Edgetech => 80.0,
            Payload::Ctd | Payload::Rhodamine => 0.0,
        }
    }

    /// Operating band as (min, max) depth in meters. A negative minimum is an
    /// altitude above the bottom.
    pub fn depth_band(&self) -> (f64, f64) {
        match self {
            Payload::Sidescan => (-10.0, 20.0),
            Payload::Multibeam => (0.0, 30.0),
            Payload::Camera => (-3.0, 50.0),
            Payload::Edgetech => (-15.0, 40.0),
            Payload::Ctd => (0.0, 100.0),
            Payload::Rhodamine => (0.0, 10.0),
        }
    }

    /// Power draw in watts while active.
    pub fn power_consumption(&self) -> f64 {
        match self {
            Payload::Sidescan => 20.0,
            Payload::Multibeam => 45.0,
            Payload::Camera => 30.0,
            Payload::Edgetech => 50.0,
            Payload::Ctd => 5.0,
            Payload::Rhodamine => 8.0,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Payload {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        Payload::ALL
            .iter()
            .find(|p| p.name() == s)
            .copied()
            .ok_or(Error::UnknownPayload(s))
    }
}

/// Narrowest positive swath among `payloads`, or [`DEFAULT_SWATH`].
pub fn survey_swath<'a>(payloads: impl IntoIterator<Item = &'a Payload>) -> f64 {
    payloads
        .into_iter()
        .map(|p| p.swath_width())
        .filter(|w| *w > 0.0)
        .fold(None, |acc: Option<f64>, w| Some(acc.map_or(w, |a| a.min(w))))
        .unwrap_or(DEFAULT_SWATH)
}

/// Working height for a task needing `payloads`. When any payload works
/// at an altitude the deepest such altitude wins, otherwise the vehicle
/// stays at [`DEFAULT_DEPTH`].
pub fn operating_z<'a>(payloads: impl IntoIterator<Item = &'a Payload>) -> Z {
    let min = payloads
        .into_iter()
        .map(|p| p.depth_band().0)
        .fold(f64::INFINITY, f64::min);
    if min < 0.0 {
        Z::Altitude(-min)
    } else {
        Z::Depth(DEFAULT_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names() {
        assert_eq!("CTD".parse::<Payload>().unwrap(), Payload::Ctd);
        assert_eq!(" sidescan".parse::<Payload>().unwrap(), Payload::Sidescan);
        assert!("sonar".parse::<Payload>().is_err());
    }

    #[test]
    fn swath_prefers_narrowest() {
        assert_eq!(survey_swath(&[Payload::Sidescan, Payload::Camera]), 5.0);
        assert_eq!(survey_swath(&[Payload::Ctd]), DEFAULT_SWATH);
        assert_eq!(survey_swath(&[]), DEFAULT_SWATH);
    }

    #[test]
    fn altitude_payloads_set_height() {
        assert_eq!(operating_z(&[Payload::Sidescan, Payload::Camera]), Z::Altitude(10.0));
        assert_eq!(operating_z(&[Payload::Ctd, Payload::Multibeam]), Z::Depth(DEFAULT_DEPTH));
        assert_eq!(operating_z(&[]), Z::Depth(DEFAULT_DEPTH));
    }
}
