use serde::Deserialize;
use uom::si::{
    f64::{
        HeatCapacity, MassDensity, SpecificHeatCapacity, ThermalConductance, Time, Volume,
        VolumeRate,
    },
    mass_density::kilogram_per_cubic_meter,
    specific_heat_capacity::joule_per_kilogram_kelvin,
    time::hour,
};

use crate::ambient::BoundaryTemperature;
use crate::error::ParameterError;
use crate::timeseries::Signal;

/// Thermal properties of the zone air.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
pub struct Air {
    pub density: MassDensity,
    pub specific_heat_capacity: SpecificHeatCapacity,
}

impl Air {
    pub fn new(
        density: MassDensity,
        specific_heat_capacity: SpecificHeatCapacity,
    ) -> Result<Self, ParameterError> {
        ParameterError::check_positive(
            "air",
            "density",
            density.get::<kilogram_per_cubic_meter>(),
        )?;
        ParameterError::check_positive(
            "air",
            "specific heat capacity",
            specific_heat_capacity.get::<joule_per_kilogram_kelvin>(),
        )?;
        Ok(Air {
            density,
            specific_heat_capacity,
        })
    }

    pub fn heat_capacity(&self, volume: Volume) -> HeatCapacity {
        volume * self.density * self.specific_heat_capacity
    }
}

impl Default for Air {
    fn default() -> Self {
        Air {
            density: MassDensity::new::<kilogram_per_cubic_meter>(1.199),
            specific_heat_capacity: SpecificHeatCapacity::new::<joule_per_kilogram_kelvin>(1012.0),
        }
    }
}

/// Air exchange between the zone and an exterior reference.
#[derive(Clone, Debug, PartialEq)]
pub struct Ventilation {
    /// Air changes per hour
    air_change_rate: Signal,
    exterior: BoundaryTemperature,
    air: Air,
}

impl Ventilation {
    pub fn new(air_change_rate: impl Into<Signal>, exterior: BoundaryTemperature) -> Self {
        Ventilation {
            air_change_rate: air_change_rate.into(),
            exterior,
            air: Air::default(),
        }
    }

    pub fn with_air(mut self, air: Air) -> Self {
        self.air = air;
        self
    }

    pub fn air_change_rate_at(&self, time: Time) -> f64 {
        self.air_change_rate.value_at(time)
    }

    pub fn exterior_temperature_at(&self, time: Time) -> f64 {
        self.exterior.temperature_at(time)
    }

    /// rho * c_p * V * n / 3600
    pub fn heat_loss_coefficient_at(&self, time: Time, zone_volume: Volume) -> ThermalConductance {
        self.air.heat_capacity(zone_volume) * self.air_change_rate_at(time)
            / Time::new::<hour>(1.0)
    }

    /// Volume of air replaced per unit time.
    pub fn air_exchange_rate_at(&self, time: Time, zone_volume: Volume) -> VolumeRate {
        zone_volume * self.air_change_rate_at(time) / Time::new::<hour>(1.0)
    }
}
