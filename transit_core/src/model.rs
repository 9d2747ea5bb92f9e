//! Payload and slot records.
//!
//! All records travel as camelCase JSON so that command payloads match the
//! telemetry feed schema.

use serde::{Deserialize, Serialize};
use transit_env::Address;

/// Travel direction along a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Compass octant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Heading {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl Heading {
    pub const ALL: [Heading; 8] = [
        Heading::N,
        Heading::NE,
        Heading::E,
        Heading::SE,
        Heading::S,
        Heading::SW,
        Heading::W,
        Heading::NW,
    ];

    /// Octant for a bearing in degrees (0 = north, clockwise).
    pub fn from_degrees(degrees: f64) -> Self {
        let normalized = degrees.rem_euclid(360.0);
        let index = ((normalized + 22.5) / 45.0).floor() as usize % 8;
        Self::ALL[index]
    }
}

/// One raw telemetry report, as delivered by the external feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleTelemetry {
    pub id: String,
    pub uri: String,
    pub agency_index: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub route_tag: String,
    pub direction: Direction,
    pub secs_since_report: i64,
    pub speed: i64,
    pub heading: Heading,
}

/// Latest known state of one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: String,
    pub uri: Address,
    pub agency: String,
    pub agency_index: u32,
    pub route_tag: String,
    pub direction: Direction,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: i64,
    pub heading: Heading,
    /// Event time in epoch milliseconds (ingestion − seconds since report)
    pub timestamp: i64,
}

impl Vehicle {
    /// Builds the stored record for telemetry addressed to `uri`.
    pub fn from_telemetry(telemetry: &VehicleTelemetry, uri: Address, timestamp: i64) -> Self {
        let agency = match &uri {
            Address::Vehicle { agency, .. } => agency.clone(),
            _ => String::new(),
        };
        Self {
            id: telemetry.id.clone(),
            uri,
            agency,
            agency_index: telemetry.agency_index,
            route_tag: telemetry.route_tag.clone(),
            direction: telemetry.direction,
            latitude: telemetry.latitude,
            longitude: telemetry.longitude,
            speed: telemetry.speed,
            heading: telemetry.heading,
            timestamp,
        }
    }
}

/// Sent by a vehicle to its agency on first contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleRef {
    pub uri: Address,
}

/// Agency identity, seeded at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgencyInfo {
    pub id: String,
    pub state: String,
    pub country: String,
    pub index: u32,
    /// Filled in by the agency when it announces itself to its state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_uri: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_uri: Option<Address>,
}

impl AgencyInfo {
    pub fn new(
        id: impl Into<String>,
        state: impl Into<String>,
        country: impl Into<String>,
        index: u32,
    ) -> Self {
        Self {
            id: id.into(),
            state: state.into(),
            country: country.into(),
            index,
            state_uri: None,
            country_uri: None,
        }
    }

    pub fn address(&self) -> Address {
        Address::agency(&self.country, &self.state, &self.id)
    }

    /// The same identity, carrying the addresses of its parents.
    pub fn wired(&self) -> Self {
        Self {
            state_uri: Some(Address::state(&self.country, &self.state)),
            country_uri: Some(Address::country(&self.country)),
            ..self.clone()
        }
    }
}

/// State identity, derived from its address on first contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateInfo {
    pub id: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_uri: Option<Address>,
}

impl StateInfo {
    pub fn new(id: impl Into<String>, country: impl Into<String>) -> Self {
        let country = country.into();
        Self {
            id: id.into(),
            country_uri: Some(Address::country(&country)),
            country,
        }
    }

    pub fn address(&self) -> Address {
        Address::state(&self.country, &self.id)
    }
}

/// A count together with the largest count ever published by the same slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Count {
    pub current: i64,
    pub max: i64,
}

impl Count {
    /// Successor of `previous` with a new current value; `max` never decreases.
    pub fn next(previous: Option<&Count>, current: i64) -> Self {
        let max = previous.map_or(current, |p| p.max.max(current));
        Self { current, max }
    }
}
