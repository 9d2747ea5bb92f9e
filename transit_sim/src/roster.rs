//! Bootstrap roster: which agencies exist and where they sit in the tree.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use transit_core::AgencyInfo;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Cannot read roster {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid roster: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Roster row {row} has an empty {field}")]
    EmptyField { row: usize, field: &'static str },
}

/// One row of the roster file. `index` is assigned by row order.
#[derive(Debug, Deserialize)]
struct RosterRow {
    #[serde(alias = "agencyId")]
    id: String,
    state: String,
    country: String,
}

/// Rows used when no roster file is given.
const DEFAULT_ROSTER: &[(&str, &str, &str)] = &[
    ("sf-muni", "CA", "US"),
    ("ac-transit", "CA", "US"),
    ("la-metro", "CA", "US"),
    ("mbta", "MA", "US"),
    ("ttc", "ON", "CA"),
    ("oc-transpo", "ON", "CA"),
    ("stm", "QC", "CA"),
];

pub fn default_roster() -> Vec<AgencyInfo> {
    DEFAULT_ROSTER
        .iter()
        .enumerate()
        .map(|(index, (id, state, country))| AgencyInfo::new(*id, *state, *country, index as u32))
        .collect()
}

/// Parses a JSON array of `{agencyId | id, state, country}` rows.
pub fn parse_roster(json: &str) -> Result<Vec<AgencyInfo>, RosterError> {
    let rows: Vec<RosterRow> = serde_json::from_str(json)?;
    rows.into_iter()
        .enumerate()
        .map(|(row, r)| {
            for (field, value) in [("id", &r.id), ("state", &r.state), ("country", &r.country)] {
                if value.trim().is_empty() {
                    return Err(RosterError::EmptyField { row, field });
                }
            }
            Ok(AgencyInfo::new(r.id, r.state, r.country, row as u32))
        })
        .collect()
}

pub fn load_roster(path: impl AsRef<Path>) -> Result<Vec<AgencyInfo>, RosterError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| RosterError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_roster(&json)
}
