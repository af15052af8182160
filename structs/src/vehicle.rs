use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{payload::Payload, Location};

/// Static description of a vehicle as found in the fleet roster.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Vehicle {
    pub id: String,
    /// Short name used for solver objects. Must not contain `_`.
    pub nickname: String,
    #[serde(default)]
    pub payloads: Vec<Payload>,
    /// Watt-hours at full charge.
    #[serde(default = "default_battery_capacity")]
    pub battery_capacity: f64,
    /// Meters per second.
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Watts drawn while moving.
    #[serde(default = "default_move_power")]
    pub move_power: f64,
}

fn default_battery_capacity() -> f64 {
    1000.0
}

fn default_speed() -> f64 {
    1.0
}

fn default_move_power() -> f64 {
    100.0
}

impl Vehicle {
    pub fn new(id: impl Into<String>, nickname: impl Into<String>, payloads: Vec<Payload>) -> Self {
        Self {
            id: id.into(),
            nickname: nickname.into(),
            payloads,
            battery_capacity: default_battery_capacity(),
            speed: default_speed(),
            move_power: default_move_power(),
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct FuelLevel {
    /// 0..=100
    pub percent: f64,
    pub time: DateTime<Utc>,
}

/// Position sample for a vehicle, either reported or projected.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct VehicleState {
    pub vehicle: String,
    pub location: Location,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub fuel: Option<FuelLevel>,
}

impl VehicleState {
    /// Fuel fraction in 0..=1, full when no reading is fresher than `recency`.
    pub fn fuel_fraction(&self, now: DateTime<Utc>, recency: Duration) -> f64 {
        match self.fuel {
            Some(fuel) if now - fuel.time <= recency => (fuel.percent / 100.0).clamp(0.0, 1.0),
            _ => 1.0,
        }
    }
}

/// End-of-plan projection for a busy vehicle. `state == None` withdraws it.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct FutureStateEvent {
    pub vehicle: String,
    pub state: Option<VehicleState>,
}

/// Lookup of the fleet as seen by the console.
pub trait VehicleDirectory: Send + Sync {
    /// Vehicles currently online.
    fn active_vehicles(&self) -> Vec<Vehicle>;
    fn vehicle(&self, id: &str) -> Option<Vehicle>;
    /// Last reported state of an online vehicle.
    fn current_state(&self, id: &str) -> Option<VehicleState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_fuel_counts_as_full() {
        let now = Utc::now();
        let mut state = VehicleState {
            vehicle: "lauv-xplore-1".into(),
            location: Location::new(41.0, -8.0),
            time: now,
            fuel: Some(FuelLevel {
                percent: 40.0,
                time: now - Duration::seconds(30),
            }),
        };
        assert_eq!(state.fuel_fraction(now, Duration::seconds(60)), 0.4);
        assert_eq!(state.fuel_fraction(now, Duration::seconds(10)), 1.0);
        state.fuel = None;
        assert_eq!(state.fuel_fraction(now, Duration::seconds(60)), 1.0);
    }

    #[test]
    fn roster_defaults() {
        let v: Vehicle =
            serde_json::from_str(r#"{"id":"lauv-xplore-1","nickname":"x1","payloads":["ctd","sidescan"]}"#)
                .unwrap();
        assert_eq!(v.payloads, vec![Payload::Ctd, Payload::Sidescan]);
        assert_eq!(v.speed, 1.0);
    }
}
