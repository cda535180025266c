//! Worker process: demo handlers for the built-in job kinds.

pub mod handlers;

pub use handlers::{demo_registry, SimulatedHandler};
