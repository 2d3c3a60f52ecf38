use std::fmt;

use serde::Deserialize;
use uom::si::{
    area::square_meter,
    f64::{
        Area, HeatTransfer, Length, Power, TemperatureInterval, ThermalConductance, Time,
        VolumeRate,
    },
    heat_transfer::watt_per_square_meter_kelvin,
    length::meter,
    temperature_interval::kelvin,
    thermal_conductance::watt_per_kelvin,
    volume_rate::cubic_meter_per_second,
};

use crate::ambient::BoundaryTemperature;
use crate::error::ParameterError;
use crate::timeseries::Signal;
use crate::tools::reciprocal_sum;

/// Empirical coefficient of buoyancy driven flow through an open window
/// [m^3 / (h * m^2 * m^0.5 * K^0.5)]
const WINDOW_FLOW_COEFFICIENT: f64 = 100.0;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Vertical,
    Floor,
    Ceiling,
}

/// Near side of an element.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum Interior {
    /// Coupled to the air of the owning zone.
    #[default]
    Zone,
    /// Held at a fixed temperature [°C]. The element then contributes a known
    /// heat flow that does not depend on the zone temperature.
    Pinned(f64),
}

/// Far side of an element.
#[derive(Clone, Debug, PartialEq)]
pub enum Exterior {
    /// Air on the far side, heat passes both surface resistances.
    Air(BoundaryTemperature),
    /// Far surface held at a given temperature, the exterior surface resistance
    /// does not apply.
    Surface(Signal),
}

impl Exterior {
    pub fn temperature_at(&self, time: Time) -> f64 {
        match self {
            Exterior::Air(boundary) => boundary.temperature_at(time),
            Exterior::Surface(signal) => signal.value_at(time),
        }
    }
}

/// Openable part of a window.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowOpening {
    pub height: Length,
    /// Any positive value means open.
    pub state: Signal,
}

/// Linear form of an element's heat flow at a single instant.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum HeatPath {
    /// `conductance * (T_zone - far_temperature)`
    Coupled {
        conductance: ThermalConductance,
        far_temperature: f64,
    },
    /// Independent of the zone temperature.
    Fixed(Power),
}

/// Wall or window: one resistive heat transfer path out of a zone.
///
/// Positive heat flow leaves the zone.
#[derive(Clone, Debug, PartialEq)]
pub struct ConductiveElement {
    pub name: String,
    pub orientation: Orientation,
    area: Area,
    u_value: HeatTransfer,
    /// Interior and exterior surface resistances [m^2 K / W]
    r_si: f64,
    r_se: f64,
    interior: Interior,
    exterior: Exterior,
    opening: Option<WindowOpening>,
}

impl ConductiveElement {
    pub fn wall(
        name: impl Into<String>,
        area: Area,
        u_value: HeatTransfer,
        exterior: Exterior,
    ) -> Result<Self, ParameterError> {
        let name = name.into();
        ParameterError::check_positive(&name, "area", area.get::<square_meter>())?;
        ParameterError::check_positive(
            &name,
            "U-value",
            u_value.get::<watt_per_square_meter_kelvin>(),
        )?;

        Ok(ConductiveElement {
            name,
            orientation: Orientation::default(),
            area,
            u_value,
            r_si: 0.0,
            r_se: 0.0,
            interior: Interior::Zone,
            exterior,
            opening: None,
        })
    }

    pub fn window(
        name: impl Into<String>,
        area: Area,
        u_value: HeatTransfer,
        exterior: Exterior,
        opening: WindowOpening,
    ) -> Result<Self, ParameterError> {
        let mut window = Self::wall(name, area, u_value, exterior)?;
        ParameterError::check_positive(&window.name, "height", opening.height.get::<meter>())?;
        window.opening = Some(opening);
        Ok(window)
    }

    pub fn with_surface_resistances(
        mut self,
        r_si: f64,
        r_se: f64,
    ) -> Result<Self, ParameterError> {
        ParameterError::check_non_negative(&self.name, "r_si", r_si)?;
        ParameterError::check_non_negative(&self.name, "r_se", r_se)?;
        self.r_si = r_si;
        self.r_se = r_se;
        Ok(self)
    }

    pub fn with_interior(mut self, interior: Interior) -> Self {
        self.interior = interior;
        self
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn area(&self) -> Area {
        self.area
    }

    pub fn interior(&self) -> Interior {
        self.interior
    }

    pub fn is_window(&self) -> bool {
        self.opening.is_some()
    }

    /// `1 / (r_si + 1/U + r_se)`, without `r_se` when the far surface temperature is given.
    pub fn effective_u_value(&self) -> HeatTransfer {
        let surface = |r: f64| HeatTransfer::new::<watt_per_square_meter_kelvin>(r.recip());
        match self.exterior {
            Exterior::Air(_) => {
                reciprocal_sum!(surface(self.r_si), self.u_value, surface(self.r_se))
            }
            Exterior::Surface(_) => reciprocal_sum!(surface(self.r_si), self.u_value),
        }
    }

    pub fn conductance(&self) -> ThermalConductance {
        self.effective_u_value() * self.area
    }

    pub fn far_side_temperature_at(&self, time: Time) -> f64 {
        self.exterior.temperature_at(time)
    }

    pub fn heat_path_at(&self, time: Time) -> HeatPath {
        let far_temperature = self.far_side_temperature_at(time);
        match self.interior {
            Interior::Zone => HeatPath::Coupled {
                conductance: self.conductance(),
                far_temperature,
            },
            Interior::Pinned(near_temperature) => HeatPath::Fixed(
                self.conductance()
                    * TemperatureInterval::new::<kelvin>(near_temperature - far_temperature),
            ),
        }
    }

    pub fn heat_flow_at(&self, time: Time, zone_temperature: f64) -> Power {
        match self.heat_path_at(time) {
            HeatPath::Coupled {
                conductance,
                far_temperature,
            } => {
                conductance
                    * TemperatureInterval::new::<kelvin>(zone_temperature - far_temperature)
            }
            HeatPath::Fixed(flow) => flow,
        }
    }

    pub fn is_open_at(&self, time: Time) -> bool {
        self.opening
            .as_ref()
            .is_some_and(|opening| opening.state.value_at(time) > 0.0)
    }

    /// Buoyancy driven air flow through the open window, zero when closed or for walls.
    pub fn infiltration_flow_at(&self, time: Time, zone_temperature: f64) -> VolumeRate {
        let flow = match &self.opening {
            Some(opening) if self.is_open_at(time) => {
                let temperature_difference =
                    (zone_temperature - self.far_side_temperature_at(time)).abs();
                // m^3/h
                WINDOW_FLOW_COEFFICIENT
                    * self.area.get::<square_meter>()
                    * (opening.height.get::<meter>() * temperature_difference).sqrt()
                    / 3600.0
            }
            _ => 0.0,
        };
        VolumeRate::new::<cubic_meter_per_second>(flow)
    }
}

impl fmt::Display for ConductiveElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}): {} W/K",
            self.name,
            self.orientation,
            self.conductance().get::<watt_per_kelvin>()
        )?;
        if let Interior::Pinned(temperature) = self.interior {
            write!(f, ", interior pinned at {temperature} °C")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambient::Ambient;
    use crate::timeseries::{Interpolation, Timeseries};
    use approx::assert_relative_eq;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use test_case::test_case;
    use test_strategy::proptest;
    use uom::si::{power::watt, time::second};

    fn at(t: f64) -> Time {
        Time::new::<second>(t)
    }

    fn outside(temperature: f64) -> Exterior {
        Exterior::Air(BoundaryTemperature::from(Arc::new(Ambient::new(
            "outside",
            temperature,
        ))))
    }

    fn wall(area: f64, u: f64, exterior: Exterior) -> ConductiveElement {
        ConductiveElement::wall(
            "wall",
            Area::new::<square_meter>(area),
            HeatTransfer::new::<watt_per_square_meter_kelvin>(u),
            exterior,
        )
        .unwrap()
    }

    #[test]
    fn bare_u_value_without_resistances() {
        let element = wall(1.0, 0.35, outside(0.0));
        assert_relative_eq!(
            element
                .effective_u_value()
                .get::<watt_per_square_meter_kelvin>(),
            0.35,
            max_relative = 1e-12
        );
    }

    #[test]
    fn surface_resistances_in_series() {
        let element = wall(10.0, 0.35, outside(0.0))
            .with_surface_resistances(0.13, 0.04)
            .unwrap();
        let expected = 1.0 / (0.13 + 1.0 / 0.35 + 0.04);
        assert_relative_eq!(
            element
                .effective_u_value()
                .get::<watt_per_square_meter_kelvin>(),
            expected,
            max_relative = 1e-12
        );
        assert_relative_eq!(
            element.conductance().get::<watt_per_kelvin>(),
            10.0 * expected,
            max_relative = 1e-12
        );
    }

    #[test]
    fn fixed_surface_skips_exterior_resistance() {
        let element = wall(1.0, 0.2, Exterior::Surface(Signal::from(24.0)))
            .with_surface_resistances(0.13, 0.04)
            .unwrap();
        assert_relative_eq!(
            element
                .effective_u_value()
                .get::<watt_per_square_meter_kelvin>(),
            1.0 / (0.13 + 1.0 / 0.2),
            max_relative = 1e-12
        );
    }

    #[test_case(20.0, 0.0, 20.0; "losing heat")]
    #[test_case(20.0, 20.0, 0.0; "balanced")]
    #[test_case(-5.0, 5.0, -10.0; "gaining heat")]
    fn heat_flow_sign(zone: f64, far: f64, expected: f64) {
        let element = wall(1.0, 1.0, outside(far));
        assert_relative_eq!(
            element.heat_flow_at(at(0.0), zone).get::<watt>(),
            expected,
            epsilon = 1e-12
        );
    }

    #[test]
    fn heat_flow_follows_ambient_series() {
        let series = Timeseries::new([(0.0, 0.0), (100.0, 10.0)], Interpolation::Linear).unwrap();
        let element = wall(
            2.0,
            1.0,
            Exterior::Air(BoundaryTemperature::from(Signal::from(series))),
        );
        assert_relative_eq!(
            element.heat_flow_at(at(50.0), 20.0).get::<watt>(),
            2.0 * (20.0 - 5.0),
            max_relative = 1e-12
        );
    }

    #[test]
    fn pinned_interior_is_independent_of_zone() {
        let floor = wall(25.0, 0.35, Exterior::Air(BoundaryTemperature::from(15.0)))
            .with_interior(Interior::Pinned(25.0))
            .with_orientation(Orientation::Floor);

        assert_matches!(floor.heat_path_at(at(0.0)), HeatPath::Fixed(_));
        assert_eq!(
            floor.heat_flow_at(at(0.0), 0.0),
            floor.heat_flow_at(at(0.0), 40.0)
        );
        assert_relative_eq!(
            floor.heat_flow_at(at(0.0), 20.0).get::<watt>(),
            25.0 * 0.35 * 10.0,
            max_relative = 1e-12
        );
    }

    #[test]
    fn invalid_geometry() {
        assert_matches!(
            ConductiveElement::wall(
                "bad",
                Area::new::<square_meter>(0.0),
                HeatTransfer::new::<watt_per_square_meter_kelvin>(1.0),
                outside(0.0)
            ),
            Err(ParameterError::NonPositive { quantity: "area", .. })
        );
        assert_matches!(
            ConductiveElement::wall(
                "bad",
                Area::new::<square_meter>(1.0),
                HeatTransfer::new::<watt_per_square_meter_kelvin>(-1.0),
                outside(0.0)
            ),
            Err(ParameterError::NonPositive { quantity: "U-value", .. })
        );
        assert_matches!(
            wall(1.0, 1.0, outside(0.0)).with_surface_resistances(-0.13, 0.04),
            Err(ParameterError::Negative { quantity: "r_si", .. })
        );
    }

    fn window(state: Signal, outdoor: f64) -> ConductiveElement {
        ConductiveElement::window(
            "window",
            Area::new::<square_meter>(2.0),
            HeatTransfer::new::<watt_per_square_meter_kelvin>(1.0),
            outside(outdoor),
            WindowOpening {
                height: Length::new::<meter>(1.6),
                state,
            },
        )
        .unwrap()
    }

    #[test]
    fn closed_window_has_no_flow() {
        let element = window(Signal::from(0.0), -10.0);
        assert!(!element.is_open_at(at(0.0)));
        assert_eq!(
            element
                .infiltration_flow_at(at(0.0), 20.0)
                .get::<cubic_meter_per_second>(),
            0.0
        );
    }

    #[test]
    fn open_window_stack_flow() {
        let element = window(Signal::from(1.0), 10.0);
        let expected = WINDOW_FLOW_COEFFICIENT * 2.0 * (1.6f64 * 10.0).sqrt();
        assert_relative_eq!(
            element
                .infiltration_flow_at(at(0.0), 20.0)
                .get::<cubic_meter_per_second>()
                * 3600.0,
            expected,
            max_relative = 1e-9
        );
    }

    #[test]
    fn window_follows_state_series() {
        let state = Timeseries::new(
            [(0.0, 0.0), (600.0, 1.0), (1200.0, 0.0)],
            Interpolation::Previous,
        )
        .unwrap();
        let element = window(Signal::from(state), 0.0);

        assert!(!element.is_open_at(at(300.0)));
        assert!(element.is_open_at(at(600.0)));
        assert!(element.is_open_at(at(900.0)));
        assert!(!element.is_open_at(at(1300.0)));
    }

    #[test_case(-1.0, false; "negative")]
    #[test_case(0.0, false; "closed")]
    #[test_case(0.25, true; "ajar")]
    #[test_case(1.0, true; "open")]
    fn open_only_for_positive_state(state: f64, open: bool) {
        let element = window(Signal::from(state), 0.0);
        assert_eq!(element.is_open_at(at(0.0)), open);
        if !open {
            assert_eq!(
                element
                    .infiltration_flow_at(at(0.0), 20.0)
                    .get::<cubic_meter_per_second>(),
                0.0
            );
        }
    }

    #[test]
    fn walls_never_open() {
        let element = wall(1.0, 1.0, outside(0.0));
        assert!(!element.is_window());
        assert!(!element.is_open_at(at(0.0)));
    }

    #[test]
    fn display_contains_conductance() {
        let element = wall(2.0, 0.5, outside(0.0));
        assert_eq!(format!("{}", element), "wall (Vertical): 1 W/K");
    }

    #[proptest]
    fn open_window_flow_is_non_negative(
        #[strategy(-30f64..40f64)] zone: f64,
        #[strategy(-30f64..40f64)] outdoor: f64,
    ) {
        let element = window(Signal::from(1.0), outdoor);
        let flow = element.infiltration_flow_at(at(0.0), zone);
        assert!(flow.get::<cubic_meter_per_second>() >= 0.0);
    }
}
