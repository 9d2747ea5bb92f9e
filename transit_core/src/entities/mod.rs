//! Domain entities of the transit tree.

mod agency;
mod country;
mod state;
mod vehicle;

pub use agency::AgencyEntity;
pub use country::CountryEntity;
pub use state::StateEntity;
pub use vehicle::VehicleEntity;
