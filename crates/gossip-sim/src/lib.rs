//! gossip-sim library: cluster simulation over the emulated network.
//!
//! The binary is a thin CLI around `Simulation`; integration tests drive
//! it directly.

pub mod report;
pub mod simulation;

pub use report::{ConvergenceReport, NodeReport};
pub use simulation::{
    ClockMode, SimClock, SimNode, Simulation, SimulationError, SimulationOptions,
};
