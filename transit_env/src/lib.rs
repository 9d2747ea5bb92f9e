//! Transit Environment Abstraction Layer
//!
//! This crate provides the seam that lets the transit entity runtime run in
//! both **Production** (tokio, wall clock) and **Simulation** (virtual clock,
//! seeded entropy) environments.
//!
//! # Core Concept
//!
//! Entities never read the clock or spawn tasks directly. Everything that
//! would introduce non-determinism goes through a [`TransitContext`]:
//! - Time (`now()`, `epoch_millis()`, `sleep()`)
//! - Task spawning (`spawn()`)
//! - Randomness (`derive_rng()`)
//!
//! The hierarchical entity [`Address`] and subscription [`LinkId`] types live
//! here as well, since both runtime and harness speak them.
//!
//! # Example
//!
//! ```ignore
//! use transit_env::{Address, SimContext, TransitContext};
//!
//! let ctx = SimContext::shared(42);
//! let vehicle: Address = "/vehicle/US/CA/sf-muni/1042".parse()?;
//! assert_eq!(vehicle.parent(), Some(Address::agency("US", "CA", "sf-muni")));
//! ctx.advance_time(std::time::Duration::from_secs(1));
//! ```

mod context;
mod error;
mod sim_impl;
mod tokio_impl;
mod types;

pub use context::TransitContext;
pub use error::EnvError;
pub use sim_impl::SimContext;
pub use tokio_impl::TokioContext;
pub use types::{Address, EntityKind, LinkId};
