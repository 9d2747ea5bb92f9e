//! Synthetic telemetry feed.
//!
//! Stands in for the third-party polling client: every tick it produces one
//! telemetry report per reporting vehicle, plus the occasional vehicle
//! leaving or returning to service. All randomness comes from one seeded
//! stream, so a seed fully determines the feed.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, NormalError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use transit_core::model::{Direction, Heading, VehicleRef};
use transit_core::{AgencyInfo, VehicleTelemetry};
use transit_env::Address;

/// Shape of the generated traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Fleet size of every agency
    pub vehicles_per_agency: usize,

    /// Chance that an active vehicle reports on a given tick
    pub report_probability: f64,

    /// Chance per tick that an active vehicle leaves service
    pub removal_probability: f64,

    /// Chance per tick that an out-of-service vehicle returns
    pub return_probability: f64,

    /// Upper bound of `secsSinceReport`
    pub max_report_age_secs: i64,

    /// Cruising speed mean and standard deviation (km/h)
    pub speed_mean: f64,
    pub speed_std: f64,
}

/// Stream id the feed's RNG is derived under from the world's context.
pub const FEED_STREAM: u64 = 0xfeed;

#[derive(Debug, thiserror::Error)]
pub enum FeedConfigError {
    #[error("speed_std must be finite and non-negative, got {0}")]
    InvalidSpread(f64),

    #[error("{field} must lie in [0, 1], got {value}")]
    InvalidProbability { field: &'static str, value: f64 },

    #[error("max_report_age_secs must be non-negative, got {0}")]
    NegativeReportAge(i64),

    #[error("Noise distribution: {0}")]
    Noise(#[from] NormalError),
}

impl FeedConfig {
    pub fn validate(&self) -> Result<(), FeedConfigError> {
        if !self.speed_std.is_finite() || self.speed_std < 0.0 {
            return Err(FeedConfigError::InvalidSpread(self.speed_std));
        }
        for (field, value) in [
            ("report_probability", self.report_probability),
            ("removal_probability", self.removal_probability),
            ("return_probability", self.return_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(FeedConfigError::InvalidProbability { field, value });
            }
        }
        if self.max_report_age_secs < 0 {
            return Err(FeedConfigError::NegativeReportAge(self.max_report_age_secs));
        }
        Ok(())
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            vehicles_per_agency: 8,
            report_probability: 0.8,
            removal_probability: 0.02,
            return_probability: 0.1,
            max_report_age_secs: 15,
            speed_mean: 28.0,
            speed_std: 9.0,
        }
    }
}

/// One message the feed wants routed into the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// `update` addressed to the vehicle
    Telemetry(VehicleTelemetry),

    /// `removeVehicle` addressed to the owning agency
    Removal { agency: Address, vehicle: VehicleRef },
}

impl FeedEvent {
    /// Address, command name and payload for the command router.
    pub fn command(&self) -> Result<(String, &'static str, serde_json::Value), serde_json::Error> {
        match self {
            FeedEvent::Telemetry(telemetry) => {
                Ok((telemetry.uri.clone(), "update", serde_json::to_value(telemetry)?))
            }
            FeedEvent::Removal { agency, vehicle } => {
                Ok((agency.to_string(), "removeVehicle", serde_json::to_value(vehicle)?))
            }
        }
    }
}

#[derive(Debug, Clone)]
struct SimVehicle {
    id: String,
    address: Address,
    agency_index: u32,
    route_tag: String,
    direction: Direction,
    latitude: f64,
    longitude: f64,
    bearing: f64,
    speed: f64,
    in_service: bool,
    /// Reported at least once since (re)entering service
    reported: bool,
}

const ROUTES: &[&str] = &["1", "5R", "14", "22", "38", "49", "N", "KT"];

/// Seeded generator of telemetry for a whole roster.
pub struct TelemetryFeed {
    config: FeedConfig,
    rng: ChaCha8Rng,
    vehicles: Vec<SimVehicle>,
    speed_noise: Normal<f64>,
    bearing_noise: Normal<f64>,
}

impl TelemetryFeed {
    /// Builds every agency's fleet, all in service, drawing from `rng`.
    ///
    /// Fails if `config` does not pass [`FeedConfig::validate`].
    pub fn new(mut rng: ChaCha8Rng, config: FeedConfig, roster: &[AgencyInfo]) -> Result<Self, FeedConfigError> {
        config.validate()?;
        let speed_noise = Normal::new(0.0, config.speed_std)?;
        let bearing_noise = Normal::new(0.0, 20.0)?;
        let mut vehicles = Vec::with_capacity(roster.len() * config.vehicles_per_agency);

        for agency in roster {
            // Loose per-agency anchor so fleets don't overlap
            let base_lat = 30.0 + (agency.index % 20) as f64;
            let base_lon = -120.0 + (agency.index / 20) as f64;
            for n in 0..config.vehicles_per_agency {
                let id = format!("{}{:03}", agency.index, n);
                vehicles.push(SimVehicle {
                    address: Address::vehicle(&agency.country, &agency.state, &agency.id, &id),
                    id,
                    agency_index: agency.index,
                    route_tag: ROUTES[rng.gen_range(0..ROUTES.len())].to_string(),
                    direction: if rng.gen_bool(0.5) { Direction::Inbound } else { Direction::Outbound },
                    latitude: base_lat + rng.gen_range(-0.1..0.1),
                    longitude: base_lon + rng.gen_range(-0.1..0.1),
                    bearing: rng.gen_range(0.0..360.0),
                    speed: config.speed_mean,
                    in_service: true,
                    reported: false,
                });
            }
        }

        Ok(Self {
            config,
            rng,
            vehicles,
            speed_noise,
            bearing_noise,
        })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Advances every vehicle by `elapsed_secs` and returns this tick's events.
    pub fn tick(&mut self, elapsed_secs: f64) -> Vec<FeedEvent> {
        let mut events = Vec::new();
        let config = &self.config;

        for vehicle in &mut self.vehicles {
            if !vehicle.in_service {
                if self.rng.gen_bool(config.return_probability) {
                    vehicle.in_service = true;
                }
                continue;
            }

            if vehicle.reported && self.rng.gen_bool(config.removal_probability) {
                vehicle.in_service = false;
                vehicle.reported = false;
                if let Some(agency) = vehicle.address.parent() {
                    events.push(FeedEvent::Removal {
                        agency,
                        vehicle: VehicleRef {
                            uri: vehicle.address.clone(),
                        },
                    });
                }
                continue;
            }

            // Drift towards cruising speed with noise
            let target = config.speed_mean + self.speed_noise.sample(&mut self.rng);
            vehicle.speed = (0.7 * vehicle.speed + 0.3 * target).max(0.0);
            vehicle.bearing = (vehicle.bearing + self.bearing_noise.sample(&mut self.rng)).rem_euclid(360.0);
            let km = vehicle.speed * elapsed_secs / 3600.0;
            let radians = vehicle.bearing.to_radians();
            vehicle.latitude += km * radians.cos() / 111.0;
            vehicle.longitude += km * radians.sin() / 111.0;

            if !self.rng.gen_bool(config.report_probability) {
                continue;
            }
            vehicle.reported = true;
            events.push(FeedEvent::Telemetry(VehicleTelemetry {
                id: vehicle.id.clone(),
                uri: vehicle.address.to_string(),
                agency_index: vehicle.agency_index,
                latitude: vehicle.latitude,
                longitude: vehicle.longitude,
                route_tag: vehicle.route_tag.clone(),
                direction: vehicle.direction,
                secs_since_report: self.rng.gen_range(0..=config.max_report_age_secs),
                speed: vehicle.speed.round() as i64,
                heading: Heading::from_degrees(vehicle.bearing),
            }));
        }
        events
    }

    /// Vehicles in service that have reported since entering service, per state.
    pub fn reported_by_state(&self) -> BTreeMap<Address, usize> {
        let mut counts = BTreeMap::new();
        for vehicle in self.vehicles.iter().filter(|v| v.in_service && v.reported) {
            if let Some(state) = vehicle.address.parent().and_then(|agency| agency.parent()) {
                *counts.entry(state).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn reported(&self) -> usize {
        self.vehicles.iter().filter(|v| v.in_service && v.reported).count()
    }

    pub fn fleet_size(&self) -> usize {
        self.vehicles.len()
    }
}
