//! Transit Core - Live Aggregation over a Tree of Transit Entities
//!
//! Vehicles stream telemetry; agencies, states and countries keep derived
//! aggregates consistent through subscriptions to their children:
//! 1. **Runtime**: one mailbox per addressable entity, state exposed as slots
//! 2. **Join lanes**: shadow copies of remote slots, recomputed on every update
//! 3. **Kinematics**: bounded speed/acceleration windows per vehicle
//!
//! The tree wires itself: a child's first contact with its parent opens the
//! links that feed the parent's aggregates.

pub mod config;
pub mod entities;
pub mod error;
pub mod join;
pub mod model;
pub mod router;
pub mod runtime;
pub mod topology;
pub mod window;

// Re-export key types for convenience
pub use config::RuntimeConfig;
pub use error::EntityError;
pub use model::{AgencyInfo, Count, StateInfo, Vehicle, VehicleTelemetry};
pub use router::Runtime;
pub use runtime::SlotEvent;
pub use window::{KinematicsTracker, SlidingWindow};
