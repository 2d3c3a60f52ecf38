//! Lumped-parameter simulation of indoor air temperature and CO2 concentration
//! in a single well mixed zone.

pub mod ambient;
pub mod case;
pub mod element;
pub mod error;
pub mod solver;
pub mod timeseries;
pub mod tools;
pub mod ventilation;
pub mod zone;

pub use case::{run_all, Case, Simulation};
pub use solver::{Integration, Sample, SimulationResult, Solver};
pub use timeseries::{Interpolation, Signal, Timeseries};
pub use zone::{Co2Sources, ThermalCo2Zone, ThermalZone};
