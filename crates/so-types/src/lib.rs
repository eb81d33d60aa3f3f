//! # so-types
//!
//! Core data model for the simulation optimizer: factor values,
//! configurations, per-run outcomes and the error taxonomy.

pub mod errors;
pub mod factor;
pub mod run;

pub use errors::*;
pub use factor::*;
pub use run::*;
