//! Command-line entry points.

pub mod recognize;
pub mod schema;
pub mod session;
