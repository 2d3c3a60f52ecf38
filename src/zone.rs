use std::fmt;

use log::{debug, warn};
use uom::si::{
    f64::{HeatCapacity, Time, Volume},
    heat_capacity::joule_per_kelvin,
    power::watt,
    thermal_conductance::watt_per_kelvin,
    time::second,
    volume::cubic_meter,
    volume_rate::cubic_meter_per_second,
};

use crate::element::{ConductiveElement, HeatPath};
use crate::error::{ParameterError, UnderdeterminedZoneError};
use crate::timeseries::Signal;
use crate::tools::mg_m3_to_ppm;
use crate::ventilation::{Air, Ventilation};

/// Typical outdoor CO2 concentration [ppm]
pub const OUTDOOR_CO2_CONCENTRATION: f64 = 400.0;

/// Balance `capacity * dx/dt = gain - loss_coefficient * x`, frozen at one instant.
///
/// Every balance of a zone is affine in its state, so this is all the solver needs.
/// The thermal balance is in J/K, W/K and W, the CO2 balance in m^3, m^3/s and
/// ppm * m^3/s.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LinearBalance {
    pub capacity: f64,
    pub loss_coefficient: f64,
    pub gain: f64,
}

impl LinearBalance {
    pub fn derivative(&self, x: f64) -> f64 {
        (self.gain - self.loss_coefficient * x) / self.capacity
    }

    /// State with zero derivative, `None` if nothing couples the state to a boundary.
    pub fn equilibrium(&self) -> Option<f64> {
        if self.loss_coefficient == 0.0 {
            None
        } else {
            Some(self.gain / self.loss_coefficient)
        }
    }

    /// Explicit Euler overshoots for steps longer than this and diverges beyond twice it.
    pub fn time_constant(&self) -> f64 {
        self.capacity / self.loss_coefficient
    }

    /// Backward Euler step, unconditionally stable.
    pub fn implicit_step(&self, x: f64, timestep: f64) -> f64 {
        (self.capacity * x + timestep * self.gain)
            / (self.capacity + timestep * self.loss_coefficient)
    }
}

/// Zone state integrated by the solver.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ZoneState {
    /// [°C]
    pub temperature: f64,
    /// [ppm]
    pub co2_concentration: f64,
}

/// Single well mixed air volume with its heat transfer paths.
#[derive(Clone, Debug, PartialEq)]
pub struct ThermalZone {
    pub name: String,
    volume: Volume,
    air: Air,
    capacity_override: Option<HeatCapacity>,
    elements: Vec<ConductiveElement>,
    ventilation: Option<Ventilation>,
    /// Convective internal gains [W]
    internal_gain: Signal,
    /// Heating (positive) or cooling (negative) input [W]
    heating_cooling: Signal,
    initial_temperature: Option<f64>,
}

impl ThermalZone {
    pub fn new(name: impl Into<String>, volume: Volume) -> Result<Self, ParameterError> {
        let name = name.into();
        ParameterError::check_positive(&name, "volume", volume.get::<cubic_meter>())?;
        Ok(ThermalZone {
            name,
            volume,
            air: Air::default(),
            capacity_override: None,
            elements: Vec::new(),
            ventilation: None,
            internal_gain: Signal::default(),
            heating_cooling: Signal::default(),
            initial_temperature: None,
        })
    }

    pub fn with_air(mut self, air: Air) -> Self {
        self.air = air;
        self
    }

    /// Replace the air based heat capacity, e.g. to account for furniture.
    pub fn with_heat_capacity(mut self, capacity: HeatCapacity) -> Result<Self, ParameterError> {
        ParameterError::check_positive(
            &self.name,
            "heat capacity",
            capacity.get::<joule_per_kelvin>(),
        )?;
        self.capacity_override = Some(capacity);
        Ok(self)
    }

    pub fn with_ventilation(mut self, ventilation: Ventilation) -> Self {
        self.ventilation = Some(ventilation);
        self
    }

    pub fn with_element(mut self, element: ConductiveElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn with_internal_gain(mut self, internal_gain: impl Into<Signal>) -> Self {
        self.internal_gain = internal_gain.into();
        self
    }

    pub fn with_heating_cooling(mut self, heating_cooling: impl Into<Signal>) -> Self {
        self.heating_cooling = heating_cooling.into();
        self
    }

    pub fn with_initial_temperature(mut self, temperature: f64) -> Self {
        self.initial_temperature = Some(temperature);
        self
    }

    pub fn add_element(&mut self, element: ConductiveElement) {
        self.elements.push(element);
    }

    pub fn volume(&self) -> Volume {
        self.volume
    }

    pub fn heat_capacity(&self) -> HeatCapacity {
        self.capacity_override
            .unwrap_or_else(|| self.air.heat_capacity(self.volume))
    }

    pub fn elements(&self) -> &[ConductiveElement] {
        &self.elements
    }

    pub fn windows(&self) -> impl Iterator<Item = &ConductiveElement> {
        self.elements.iter().filter(|element| element.is_window())
    }

    pub fn ventilation(&self) -> Option<&Ventilation> {
        self.ventilation.as_ref()
    }

    pub fn initial_temperature(&self) -> Option<f64> {
        self.initial_temperature
    }

    /// Heat balance of the zone air at `time`.
    pub fn thermal_balance_at(&self, time: Time) -> LinearBalance {
        let mut loss_coefficient = 0.0;
        let mut gain = self.internal_gain.value_at(time) + self.heating_cooling.value_at(time);

        for element in self.elements.iter() {
            match element.heat_path_at(time) {
                HeatPath::Coupled {
                    conductance,
                    far_temperature,
                } => {
                    let conductance = conductance.get::<watt_per_kelvin>();
                    loss_coefficient += conductance;
                    gain += conductance * far_temperature;
                }
                HeatPath::Fixed(flow) => gain -= flow.get::<watt>(),
            }
        }

        if let Some(ventilation) = &self.ventilation {
            let coefficient = ventilation
                .heat_loss_coefficient_at(time, self.volume)
                .get::<watt_per_kelvin>();
            loss_coefficient += coefficient;
            gain += coefficient * ventilation.exterior_temperature_at(time);
        }

        LinearBalance {
            capacity: self.heat_capacity().get::<joule_per_kelvin>(),
            loss_coefficient,
            gain,
        }
    }

    /// dT/dt [K/s]
    pub fn temperature_derivative(&self, time: Time, temperature: f64) -> f64 {
        self.thermal_balance_at(time).derivative(temperature)
    }

    /// Equilibrium temperature for the boundary conditions at t = 0.
    pub fn calc_steady_state_result(&self) -> Result<f64, UnderdeterminedZoneError> {
        self.steady_state_at(Time::new::<second>(0.0))
    }

    /// Equilibrium temperature for the boundary conditions at `time`.
    pub fn steady_state_at(&self, time: Time) -> Result<f64, UnderdeterminedZoneError> {
        let temperature = self
            .thermal_balance_at(time)
            .equilibrium()
            .ok_or_else(|| UnderdeterminedZoneError {
                zone: self.name.clone(),
            })?;
        debug!(
            "Steady state of zone {:?} at {} s: {:.3} °C",
            self.name,
            time.get::<second>(),
            temperature
        );
        Ok(temperature)
    }

    /// The configured initial temperature, or the steady state at t = 0.
    pub fn starting_temperature(&self) -> Result<f64, UnderdeterminedZoneError> {
        match self.initial_temperature {
            Some(temperature) => Ok(temperature),
            None => {
                warn!(
                    "Zone {:?} has no initial temperature, starting from steady state",
                    self.name
                );
                self.calc_steady_state_result()
            }
        }
    }
}

impl fmt::Display for ThermalZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} m^3, {} J/K",
            self.name,
            self.volume.get::<cubic_meter>(),
            self.heat_capacity().get::<joule_per_kelvin>()
        )?;
        for element in self.elements.iter() {
            writeln!(f, "    {element}")?;
        }
        if let Some(ventilation) = &self.ventilation {
            writeln!(
                f,
                "    ventilation: {} W/K at t = 0",
                ventilation
                    .heat_loss_coefficient_at(Time::new::<second>(0.0), self.volume)
                    .get::<watt_per_kelvin>()
            )?;
        }
        Ok(())
    }
}

/// CO2 inputs of a zone.
#[derive(Clone, Debug, PartialEq)]
pub struct Co2Sources {
    /// [ppm]
    pub initial_concentration: f64,
    pub n_persons: Signal,
    /// Per person [mg/h]
    pub emission_rate: f64,
    /// [mg/h]
    pub internal_source: Signal,
    /// Concentration of air entering through ventilation and windows [ppm]
    pub ambient_concentration: Signal,
}

impl Default for Co2Sources {
    fn default() -> Self {
        Co2Sources {
            initial_concentration: OUTDOOR_CO2_CONCENTRATION,
            n_persons: Signal::default(),
            emission_rate: 0.0,
            internal_source: Signal::default(),
            ambient_concentration: Signal::Constant(OUTDOOR_CO2_CONCENTRATION),
        }
    }
}

/// Thermal zone that also tracks the CO2 concentration of its air.
#[derive(Clone, Debug, PartialEq)]
pub struct ThermalCo2Zone {
    thermal: ThermalZone,
    co2: Co2Sources,
}

impl ThermalCo2Zone {
    pub fn new(thermal: ThermalZone, co2: Co2Sources) -> Self {
        ThermalCo2Zone { thermal, co2 }
    }

    pub fn thermal(&self) -> &ThermalZone {
        &self.thermal
    }

    pub fn co2(&self) -> &Co2Sources {
        &self.co2
    }

    /// CO2 balance at `time`, window flows driven by `zone_temperature`.
    pub fn co2_balance_at(&self, time: Time, zone_temperature: f64) -> LinearBalance {
        let volume = self.thermal.volume;

        let mut exchange = self
            .thermal
            .ventilation
            .as_ref()
            .map_or(0.0, |ventilation| {
                ventilation
                    .air_exchange_rate_at(time, volume)
                    .get::<cubic_meter_per_second>()
            });
        exchange += self
            .thermal
            .windows()
            .map(|window| {
                window
                    .infiltration_flow_at(time, zone_temperature)
                    .get::<cubic_meter_per_second>()
            })
            .sum::<f64>();

        // mg/h -> ppm * m^3/s
        let emission = mg_m3_to_ppm(
            self.co2.n_persons.value_at(time) * self.co2.emission_rate
                + self.co2.internal_source.value_at(time),
        ) / 3600.0;

        LinearBalance {
            capacity: volume.get::<cubic_meter>(),
            loss_coefficient: exchange,
            gain: emission + exchange * self.co2.ambient_concentration.value_at(time),
        }
    }

    /// dC/dt [ppm/s]
    pub fn co2_derivative(&self, time: Time, state: ZoneState) -> f64 {
        self.co2_balance_at(time, state.temperature)
            .derivative(state.co2_concentration)
    }

    /// Time derivative of both states, each evaluated from `state` only.
    pub fn derivative(&self, time: Time, state: ZoneState) -> ZoneState {
        ZoneState {
            temperature: self.thermal.temperature_derivative(time, state.temperature),
            co2_concentration: self.co2_derivative(time, state),
        }
    }

    pub fn initial_state(&self) -> Result<ZoneState, UnderdeterminedZoneError> {
        Ok(ZoneState {
            temperature: self.thermal.starting_temperature()?,
            co2_concentration: self.co2.initial_concentration,
        })
    }
}

impl AsRef<ThermalZone> for ThermalCo2Zone {
    fn as_ref(&self) -> &ThermalZone {
        &self.thermal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambient::{Ambient, BoundaryTemperature};
    use crate::element::{Exterior, Interior, WindowOpening};
    use crate::tools::ppm_to_mg_m3;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use test_case::test_case;
    use test_strategy::proptest;
    use uom::si::{
        area::square_meter,
        f64::{Area, HeatTransfer, Length},
        heat_transfer::watt_per_square_meter_kelvin,
        length::meter,
    };

    fn at(t: f64) -> Time {
        Time::new::<second>(t)
    }

    fn zone(volume: f64) -> ThermalZone {
        ThermalZone::new("test", Volume::new::<cubic_meter>(volume)).unwrap()
    }

    fn unit_wall(exterior: f64) -> ConductiveElement {
        ConductiveElement::wall(
            "wall",
            Area::new::<square_meter>(1.0),
            HeatTransfer::new::<watt_per_square_meter_kelvin>(1.0),
            Exterior::Air(BoundaryTemperature::from(exterior)),
        )
        .unwrap()
    }

    #[test]
    fn single_wall_steady_state_is_exterior() {
        let zone = zone(50.0).with_element(unit_wall(0.0));
        assert_abs_diff_eq!(zone.calc_steady_state_result().unwrap(), 0.0);
    }

    #[test_case(0.0, 100.0, 100.0; "gain on cold side")]
    #[test_case(-10.0, 250.0, 240.0; "negative exterior")]
    #[test_case(20.0, 0.0, 20.0; "no gain")]
    fn steady_state_with_internal_gain(exterior: f64, gain: f64, expected: f64) {
        let zone = zone(50.0)
            .with_element(unit_wall(exterior))
            .with_internal_gain(gain);
        assert_relative_eq!(
            zone.calc_steady_state_result().unwrap(),
            expected,
            epsilon = 1e-9
        );
    }

    #[test]
    fn steady_state_balances_ventilation_and_walls() {
        let outside = Arc::new(Ambient::new("outside", -10.0));
        let ventilation = Ventilation::new(0.5, BoundaryTemperature::from(Arc::clone(&outside)));
        let wall = ConductiveElement::wall(
            "outside walls",
            Area::new::<square_meter>(27.0),
            HeatTransfer::new::<watt_per_square_meter_kelvin>(0.35),
            Exterior::Air(BoundaryTemperature::from(outside)),
        )
        .unwrap()
        .with_surface_resistances(0.13, 0.04)
        .unwrap();
        let zone = zone(93.6)
            .with_ventilation(ventilation.clone())
            .with_element(wall.clone())
            .with_internal_gain(1200.0)
            .with_heating_cooling(350.0);

        let temperature = zone.calc_steady_state_result().unwrap();

        let losses = wall.heat_flow_at(at(0.0), temperature).get::<watt>()
            + ventilation
                .heat_loss_coefficient_at(at(0.0), zone.volume())
                .get::<watt_per_kelvin>()
                * (temperature + 10.0);
        assert_relative_eq!(losses, 1550.0, max_relative = 1e-9);
        assert_abs_diff_eq!(zone.temperature_derivative(at(0.0), temperature), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn steady_state_at_later_instant() {
        let outdoor = crate::timeseries::Timeseries::new(
            [(0.0, 0.0), (3600.0, 10.0)],
            crate::timeseries::Interpolation::Linear,
        )
        .unwrap();
        let zone = zone(50.0).with_element(
            ConductiveElement::wall(
                "wall",
                Area::new::<square_meter>(1.0),
                HeatTransfer::new::<watt_per_square_meter_kelvin>(1.0),
                Exterior::Air(BoundaryTemperature::from(Signal::from(outdoor))),
            )
            .unwrap(),
        );
        assert_relative_eq!(zone.steady_state_at(at(1800.0)).unwrap(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn pinned_element_adds_fixed_loss() {
        let floor = unit_wall(10.0).with_interior(Interior::Pinned(25.0));
        let zone = zone(50.0).with_element(unit_wall(0.0)).with_element(floor);

        // 15 W leave through the floor regardless of the zone temperature
        assert_relative_eq!(zone.calc_steady_state_result().unwrap(), -15.0, epsilon = 1e-12);
    }

    #[test]
    fn empty_zone_is_underdetermined() {
        assert_eq!(
            zone(50.0).calc_steady_state_result(),
            Err(UnderdeterminedZoneError {
                zone: "test".into()
            })
        );
    }

    #[test]
    fn only_pinned_elements_is_underdetermined() {
        let zone = zone(50.0).with_element(unit_wall(0.0).with_interior(Interior::Pinned(20.0)));
        assert_matches!(zone.calc_steady_state_result(), Err(UnderdeterminedZoneError { .. }));
    }

    #[test]
    fn starting_temperature_prefers_initial_value() {
        let zone = zone(50.0).with_element(unit_wall(0.0));
        assert_eq!(zone.starting_temperature(), Ok(0.0));
        assert_eq!(zone.with_initial_temperature(20.0).starting_temperature(), Ok(20.0));
    }

    #[test]
    fn air_based_heat_capacity() {
        let zone = zone(10.0);
        assert_relative_eq!(
            zone.heat_capacity().get::<joule_per_kelvin>(),
            10.0 * 1.199 * 1012.0,
            max_relative = 1e-12
        );
        let zone = zone
            .with_heat_capacity(HeatCapacity::new::<joule_per_kelvin>(1e6))
            .unwrap();
        assert_eq!(zone.heat_capacity().get::<joule_per_kelvin>(), 1e6);
    }

    #[test]
    fn zero_volume_rejected() {
        assert_matches!(
            ThermalZone::new("nothing", Volume::new::<cubic_meter>(0.0)),
            Err(ParameterError::NonPositive { quantity: "volume", .. })
        );
    }

    #[test]
    fn display_lists_elements() {
        let text = format!("{}", zone(50.0).with_element(unit_wall(0.0)));
        text.find("wall (Vertical): 1 W/K")
            .expect("Zone display should list its elements");
    }

    #[test]
    fn implicit_step_reaches_equilibrium_for_huge_steps() {
        let balance = LinearBalance {
            capacity: 1.0,
            loss_coefficient: 2.0,
            gain: 10.0,
        };
        assert_relative_eq!(balance.implicit_step(0.0, 1e12), 5.0, max_relative = 1e-9);
        assert_eq!(balance.time_constant(), 0.5);
    }

    fn co2_zone(air_change_rate: f64, co2: Co2Sources) -> ThermalCo2Zone {
        let thermal = zone(50.0)
            .with_element(unit_wall(20.0))
            .with_ventilation(Ventilation::new(
                air_change_rate,
                BoundaryTemperature::from(20.0),
            ))
            .with_initial_temperature(20.0);
        ThermalCo2Zone::new(thermal, co2)
    }

    #[test]
    fn co2_without_sources_or_exchange_is_constant() {
        let zone = co2_zone(
            0.0,
            Co2Sources {
                initial_concentration: 1200.0,
                ..Default::default()
            },
        );
        let state = zone.initial_state().unwrap();
        assert_eq!(zone.co2_derivative(at(0.0), state), 0.0);
    }

    #[test]
    fn person_emission_rate() {
        let zone = co2_zone(
            0.0,
            Co2Sources {
                n_persons: Signal::from(2.0),
                emission_rate: 27000.0,
                ..Default::default()
            },
        );
        let state = zone.initial_state().unwrap();
        // 54 g/h spread over 50 m^3
        let expected = mg_m3_to_ppm(54000.0 / 50.0) / 3600.0;
        assert_relative_eq!(zone.co2_derivative(at(0.0), state), expected, max_relative = 1e-12);
        assert_relative_eq!(ppm_to_mg_m3(expected * 3600.0), 1080.0, max_relative = 1e-12);
    }

    #[test]
    fn ventilation_pulls_towards_ambient() {
        let zone = co2_zone(
            1.0,
            Co2Sources {
                initial_concentration: 1400.0,
                ..Default::default()
            },
        );
        let state = zone.initial_state().unwrap();
        // One air change per hour: -(1400 - 400) ppm/h
        assert_relative_eq!(
            zone.co2_derivative(at(0.0), state),
            -1000.0 / 3600.0,
            max_relative = 1e-12
        );
    }

    #[test]
    fn open_window_adds_exchange() {
        let window = ConductiveElement::window(
            "window",
            Area::new::<square_meter>(1.0),
            HeatTransfer::new::<watt_per_square_meter_kelvin>(1.0),
            Exterior::Air(BoundaryTemperature::from(10.0)),
            WindowOpening {
                height: Length::new::<meter>(1.0),
                state: Signal::from(1.0),
            },
        )
        .unwrap();
        let thermal = zone(50.0).with_element(window).with_initial_temperature(20.0);
        let zone = ThermalCo2Zone::new(
            thermal,
            Co2Sources {
                initial_concentration: 1400.0,
                ..Default::default()
            },
        );

        let balance = zone.co2_balance_at(at(0.0), 20.0);
        let flow = 100.0 * 10f64.sqrt() / 3600.0;
        assert_relative_eq!(balance.loss_coefficient, flow, max_relative = 1e-12);

        // Same temperature on both sides, no buoyancy
        assert_eq!(zone.co2_balance_at(at(0.0), 10.0).loss_coefficient, 0.0);
    }

    #[proptest]
    fn thermal_derivative_vanishes_at_steady_state(
        #[strategy(-20f64..35f64)] exterior: f64,
        #[strategy(0f64..5000f64)] gain: f64,
        #[strategy(0.1f64..3f64)] air_change_rate: f64,
    ) {
        let zone = zone(80.0)
            .with_element(unit_wall(exterior))
            .with_ventilation(Ventilation::new(
                air_change_rate,
                BoundaryTemperature::from(exterior),
            ))
            .with_internal_gain(gain);
        let temperature = zone.calc_steady_state_result().unwrap();
        assert!(zone.temperature_derivative(at(0.0), temperature).abs() < 1e-9);
        assert!(temperature >= exterior - 1e-9);
    }
}
