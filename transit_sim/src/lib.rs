//! Transit Deterministic Simulation Harness
//!
//! Runs the whole entity tree against a virtual clock:
//! - **Roster**: which agencies, states and countries exist
//! - **Feed**: seeded synthetic telemetry in the live feed's schema
//! - **World**: ticks the clock, routes the feed, reads aggregates back
//!
//! Every source of randomness derives from one 64-bit seed, so any
//! inconsistency a run finds is reproducible from its seed.
//!
//! # Usage
//!
//! ```ignore
//! use transit_sim::{default_roster, TransitWorld, WorldConfig};
//!
//! let mut world = TransitWorld::new(WorldConfig::default(), default_roster())?;
//! world.run(30).await;
//! world.summary().await.check()?;
//! ```

pub mod feed;
pub mod roster;
pub mod world;

pub use feed::{FeedConfig, FeedConfigError, FeedEvent, TelemetryFeed, FEED_STREAM};
pub use roster::{default_roster, load_roster, parse_roster, RosterError};
pub use world::{CountrySummary, StateSummary, TransitWorld, WorldConfig, WorldError, WorldSummary};
