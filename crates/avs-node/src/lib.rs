//! Aggregator node: configuration, logging setup and a local in-memory
//! round wiring every component together.

pub mod config;
pub mod logging;
pub mod simulation;

pub use config::{LoggingConfig, NodeConfig, SimulationConfig, TasksConfig};
pub use simulation::{run_simulation, SimulationReport};
