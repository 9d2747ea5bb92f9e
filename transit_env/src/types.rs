//! Common types for the transit environment abstraction.

use crate::error::EnvError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The four kinds of entity in the transit tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Vehicle,
    Agency,
    State,
    Country,
}

impl EntityKind {
    /// Leading path segment for addresses of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Vehicle => "vehicle",
            EntityKind::Agency => "agency",
            EntityKind::State => "state",
            EntityKind::Country => "country",
        }
    }

    /// Whether the router creates entities of this kind on first reference.
    ///
    /// Only leaves are upserted; the rest of the tree is seeded at bootstrap.
    pub fn is_upsert(&self) -> bool {
        matches!(self, EntityKind::Vehicle)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hierarchical address of an entity.
///
/// String form:
/// ```text
/// /vehicle/{country}/{state}/{agency}/{id}
/// /agency/{country}/{state}/{id}
/// /state/{country}/{id}
/// /country/{id}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Address {
    Vehicle {
        country: String,
        state: String,
        agency: String,
        id: String,
    },
    Agency {
        country: String,
        state: String,
        id: String,
    },
    State {
        country: String,
        id: String,
    },
    Country {
        id: String,
    },
}

impl Address {
    pub fn vehicle(
        country: impl Into<String>,
        state: impl Into<String>,
        agency: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Address::Vehicle {
            country: country.into(),
            state: state.into(),
            agency: agency.into(),
            id: id.into(),
        }
    }

    pub fn agency(
        country: impl Into<String>,
        state: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Address::Agency {
            country: country.into(),
            state: state.into(),
            id: id.into(),
        }
    }

    pub fn state(country: impl Into<String>, id: impl Into<String>) -> Self {
        Address::State {
            country: country.into(),
            id: id.into(),
        }
    }

    pub fn country(id: impl Into<String>) -> Self {
        Address::Country { id: id.into() }
    }

    /// Returns the entity kind this address points at.
    pub fn kind(&self) -> EntityKind {
        match self {
            Address::Vehicle { .. } => EntityKind::Vehicle,
            Address::Agency { .. } => EntityKind::Agency,
            Address::State { .. } => EntityKind::State,
            Address::Country { .. } => EntityKind::Country,
        }
    }

    /// The last path segment (the entity's own id).
    pub fn id(&self) -> &str {
        match self {
            Address::Vehicle { id, .. }
            | Address::Agency { id, .. }
            | Address::State { id, .. }
            | Address::Country { id } => id,
        }
    }

    /// The address one level up the hierarchy, derived from the shared prefix.
    pub fn parent(&self) -> Option<Address> {
        match self {
            Address::Vehicle {
                country,
                state,
                agency,
                ..
            } => Some(Address::agency(country, state, agency)),
            Address::Agency { country, state, .. } => Some(Address::state(country, state)),
            Address::State { country, .. } => Some(Address::country(country)),
            Address::Country { .. } => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Vehicle {
                country,
                state,
                agency,
                id,
            } => write!(f, "/vehicle/{}/{}/{}/{}", country, state, agency, id),
            Address::Agency { country, state, id } => {
                write!(f, "/agency/{}/{}/{}", country, state, id)
            }
            Address::State { country, id } => write!(f, "/state/{}/{}", country, id),
            Address::Country { id } => write!(f, "/country/{}", id),
        }
    }
}

impl FromStr for Address {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = s
            .strip_prefix('/')
            .ok_or_else(|| EnvError::invalid_address(s, "must start with '/'"))?;
        let segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err(EnvError::invalid_address(s, "empty path segment"));
        }

        match segments.as_slice() {
            ["vehicle", country, state, agency, id] => {
                Ok(Address::vehicle(*country, *state, *agency, *id))
            }
            ["agency", country, state, id] => Ok(Address::agency(*country, *state, *id)),
            ["state", country, id] => Ok(Address::state(*country, *id)),
            ["country", id] => Ok(Address::country(*id)),
            [kind, ..] => Err(EnvError::invalid_address(
                s,
                format!("unknown kind or wrong segment count for '{}'", kind),
            )),
            [] => Err(EnvError::invalid_address(s, "empty path")),
        }
    }
}

impl TryFrom<String> for Address {
    type Error = EnvError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Unique identifier for one subscription link.
///
/// Uses UUID v4 so that parents can open links without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkId(pub Uuid);

impl LinkId {
    /// Creates a new random LinkId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic LinkId from a seed (for tests).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}
