//! TransitWorld - the simulation harness container.
//!
//! Wires a roster, a telemetry feed and a [`Runtime`] onto one virtual
//! clock. Each tick advances the clock, routes the feed's events and waits
//! for the entity tree to settle, so summaries are read from a quiet tree.

use crate::feed::{FeedConfig, FeedConfigError, FeedEvent, TelemetryFeed, FEED_STREAM};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use transit_core::{AgencyInfo, Count, EntityError, Runtime, RuntimeConfig};
use transit_env::{Address, SimContext, TransitContext};

/// Configuration for a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Virtual time between feed polls
    pub tick_interval_ms: u64,

    pub feed: FeedConfig,
    pub runtime: RuntimeConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tick_interval_ms: 10_000,
            feed: FeedConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("Invalid feed configuration: {0}")]
    Feed(#[from] FeedConfigError),

    #[error("Seeding failed: {0}")]
    Seed(#[from] EntityError),
}

/// Aggregates of one state, as read back from its slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSummary {
    pub address: String,
    pub count: Count,
    pub speed: Option<f64>,
    pub vehicles: usize,
    /// Vehicles the feed believes are in service here
    pub expected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountrySummary {
    pub address: String,
    pub count: Count,
    pub speed: Option<f64>,
    pub vehicles: usize,
    pub states: Vec<StateSummary>,
}

/// Result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSummary {
    pub seed: u64,
    pub ticks: u64,
    pub sim_time_secs: f64,
    pub entities: usize,
    pub reported_vehicles: usize,
    pub countries: Vec<CountrySummary>,
}

impl WorldSummary {
    /// Checks that every level agrees on how many vehicles are in service.
    ///
    /// Returns a description of the first disagreement.
    pub fn check(&self) -> Result<(), String> {
        let mut total = 0;
        for country in &self.countries {
            let from_states: i64 = country.states.iter().map(|s| s.count.current).sum();
            if country.count.current != from_states {
                return Err(format!(
                    "{} counts {} but its states sum to {}",
                    country.address, country.count.current, from_states
                ));
            }
            if country.vehicles as i64 != country.count.current {
                return Err(format!(
                    "{} counts {} but holds {} vehicles",
                    country.address, country.count.current, country.vehicles
                ));
            }
            for state in &country.states {
                if state.count.current != state.expected as i64 {
                    return Err(format!(
                        "{} counts {} but the feed has {} in service",
                        state.address, state.count.current, state.expected
                    ));
                }
                if state.count.max < state.count.current {
                    return Err(format!("{} max {} below current", state.address, state.count.max));
                }
            }
            total += country.vehicles;
        }
        if total != self.reported_vehicles {
            return Err(format!(
                "countries hold {} vehicles, feed reported {}",
                total, self.reported_vehicles
            ));
        }
        Ok(())
    }
}

/// The TransitWorld - container for the entire simulation.
pub struct TransitWorld {
    pub config: WorldConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    pub runtime: Runtime<SimContext>,

    roster: Vec<AgencyInfo>,
    feed: TelemetryFeed,
    tick_count: u64,
}

impl TransitWorld {
    /// Creates a world and seeds every agency of the roster.
    pub fn new(config: WorldConfig, roster: Vec<AgencyInfo>) -> Result<Self, WorldError> {
        let context = SimContext::shared(config.seed);
        let feed = TelemetryFeed::new(context.derive_rng(FEED_STREAM), config.feed.clone(), &roster)?;
        let runtime = Runtime::new(context.clone(), config.runtime.clone());

        for agency in &roster {
            runtime.seed_agency(agency.clone())?;
        }
        info!(
            seed = config.seed,
            agencies = roster.len(),
            fleet = feed.fleet_size(),
            "world seeded"
        );

        Ok(Self {
            config,
            context,
            runtime,
            roster,
            feed,
            tick_count: 0,
        })
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// One feed poll: advance the clock, route events, wait for quiet.
    pub async fn tick(&mut self) {
        let interval = Duration::from_millis(self.config.tick_interval_ms);
        self.context.sleep(interval).await;

        let events = self.feed.tick(interval.as_secs_f64());
        let removals = events
            .iter()
            .filter(|e| matches!(e, FeedEvent::Removal { .. }))
            .count();
        for event in &events {
            match event.command() {
                Ok((address, command, payload)) => self.runtime.dispatch(&address, command, payload),
                Err(err) => warn!(error = %err, "feed event not encodable; skipped"),
            }
        }
        self.runtime.settle().await;
        self.tick_count += 1;

        debug!(
            tick = self.tick_count,
            events = events.len(),
            removals,
            entities = self.runtime.entity_count(),
            "tick complete"
        );
    }

    pub async fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick().await;
        }
    }

    /// Reads every state's and country's aggregates back from the runtime.
    pub async fn summary(&self) -> WorldSummary {
        let expected = self.feed.reported_by_state();

        let mut tree: BTreeMap<Address, Vec<Address>> = BTreeMap::new();
        for agency in &self.roster {
            let states = tree.entry(Address::country(&agency.country)).or_default();
            let state = Address::state(&agency.country, &agency.state);
            if !states.contains(&state) {
                states.push(state);
            }
        }

        let mut countries = Vec::with_capacity(tree.len());
        for (country, states) in tree {
            let mut state_summaries = Vec::with_capacity(states.len());
            for state in states {
                let (count, speed, vehicles) = self.aggregates(&state).await;
                state_summaries.push(StateSummary {
                    expected: expected.get(&state).copied().unwrap_or(0),
                    address: state.to_string(),
                    count,
                    speed,
                    vehicles,
                });
            }
            let (count, speed, vehicles) = self.aggregates(&country).await;
            countries.push(CountrySummary {
                address: country.to_string(),
                count,
                speed,
                vehicles,
                states: state_summaries,
            });
        }

        WorldSummary {
            seed: self.config.seed,
            ticks: self.tick_count,
            sim_time_secs: self.context.now().as_secs_f64(),
            entities: self.runtime.entity_count(),
            reported_vehicles: self.feed.reported(),
            countries,
        }
    }

    async fn aggregates(&self, address: &Address) -> (Count, Option<f64>, usize) {
        let count = self
            .runtime
            .read(address, "count")
            .await
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let speed = self.runtime.read(address, "speed").await.and_then(|v| v.as_f64());
        let vehicles = self
            .runtime
            .read(address, "vehicles")
            .await
            .and_then(|v| v.as_object().map(|entries| entries.len()))
            .unwrap_or(0);
        (count, speed, vehicles)
    }

    pub async fn shutdown(&self) {
        self.runtime.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::default_roster;

    #[tokio::test]
    async fn test_seeding_creates_tree() {
        let world = TransitWorld::new(WorldConfig::default(), default_roster()).unwrap();
        world.runtime.settle().await;

        // 7 agencies, 4 states, 2 countries
        assert_eq!(world.runtime.entity_count(), 13);
        let summary = world.summary().await;
        assert_eq!(summary.countries.len(), 2);
        assert_eq!(summary.reported_vehicles, 0);
        summary.check().unwrap();
        world.shutdown().await;
    }

    #[tokio::test]
    async fn test_tick_advances_virtual_clock() {
        let mut world = TransitWorld::new(WorldConfig::default(), default_roster()).unwrap();
        world.run(3).await;

        assert_eq!(world.tick_count(), 3);
        assert_eq!(world.context.now(), Duration::from_secs(30));
        world.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_feed_config_fails_world() {
        let config = WorldConfig {
            feed: FeedConfig { speed_std: -1.0, ..FeedConfig::default() },
            ..WorldConfig::default()
        };
        let result = TransitWorld::new(config, default_roster());
        assert!(matches!(result, Err(WorldError::Feed(FeedConfigError::InvalidSpread(_)))));
    }

    #[test]
    fn test_check_reports_disagreement() {
        let state = StateSummary {
            address: "/state/US/CA".into(),
            count: Count { current: 2, max: 2 },
            speed: None,
            vehicles: 2,
            expected: 2,
        };
        let mut summary = WorldSummary {
            seed: 0,
            ticks: 1,
            sim_time_secs: 1.0,
            entities: 4,
            reported_vehicles: 2,
            countries: vec![CountrySummary {
                address: "/country/US".into(),
                count: Count { current: 3, max: 3 },
                speed: None,
                vehicles: 2,
                states: vec![state],
            }],
        };
        assert!(summary.check().unwrap_err().contains("states sum to 2"));

        summary.countries[0].count = Count { current: 2, max: 3 };
        assert!(summary.check().is_ok());
    }
}
