//! Diet-to-footprint attribution and aggregation.
//!
//! Batch pipeline turning per-country food supply data into environmental
//! footprints attributed to diets: baseline diet construction with food-loss
//! adjustment, alternative diet scenarios, country-of-origin allocation,
//! footprint escalation and attachment, and bootstrap aggregation of
//! footprint distributions.

pub mod baseline;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod footprints;
pub mod model;
pub mod origin;
pub mod scenarios;
pub mod schema;
pub mod stats;

pub use config::{FootprintCategory, FootprintClass, FootprintClassTable, ReferenceDiet, RunParams};
pub use error::DietError;
pub use model::DietModel;
