use std::sync::Arc;

use uom::si::f64::Time;

use crate::timeseries::Signal;

/// Named boundary node, typically the outdoor air.
#[derive(Clone, Debug, PartialEq)]
pub struct Ambient {
    pub name: String,
    /// [°C]
    pub temperature: Signal,
}

impl Ambient {
    pub fn new(name: impl Into<String>, temperature: impl Into<Signal>) -> Self {
        Ambient {
            name: name.into(),
            temperature: temperature.into(),
        }
    }

    pub fn temperature_at(&self, time: Time) -> f64 {
        self.temperature.value_at(time)
    }
}

/// Temperature on the far side of a heat or air exchange path.
///
/// Resolved on every evaluation, nothing is cached.
#[derive(Clone, Debug, PartialEq)]
pub enum BoundaryTemperature {
    /// Constant or measured temperature, e.g. of an adjacent room.
    Given(Signal),
    Ambient(Arc<Ambient>),
}

impl BoundaryTemperature {
    pub fn temperature_at(&self, time: Time) -> f64 {
        match self {
            BoundaryTemperature::Given(signal) => signal.value_at(time),
            BoundaryTemperature::Ambient(ambient) => ambient.temperature_at(time),
        }
    }
}

impl From<Arc<Ambient>> for BoundaryTemperature {
    fn from(ambient: Arc<Ambient>) -> Self {
        BoundaryTemperature::Ambient(ambient)
    }
}

impl From<f64> for BoundaryTemperature {
    fn from(temperature: f64) -> Self {
        BoundaryTemperature::Given(temperature.into())
    }
}

impl From<Signal> for BoundaryTemperature {
    fn from(signal: Signal) -> Self {
        BoundaryTemperature::Given(signal)
    }
}
