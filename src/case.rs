use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use log::debug;
use rayon::prelude::*;

use crate::ambient::{Ambient, BoundaryTemperature};
use crate::element::{ConductiveElement, Exterior, Interior};
use crate::error::{SolverError, UnderdeterminedZoneError};
use crate::solver::{SimulationResult, Solver};
use crate::timeseries::{Signal, Timeseries};
use crate::ventilation::{Air, Ventilation};
use crate::zone::{ThermalCo2Zone, ThermalZone};

/// What gets integrated for a case.
#[derive(Clone, Debug, PartialEq)]
pub enum Simulation {
    Thermal(ThermalZone),
    ThermalCo2(ThermalCo2Zone),
    /// CO2 balance at a prescribed indoor temperature.
    Co2Only {
        zone: ThermalCo2Zone,
        indoor_temperature: Signal,
    },
}

impl Simulation {
    pub fn thermal_zone(&self) -> &ThermalZone {
        match self {
            Simulation::Thermal(zone) => zone,
            Simulation::ThermalCo2(zone) | Simulation::Co2Only { zone, .. } => zone.thermal(),
        }
    }
}

/// Zone, inputs and solver settings of one simulation run.
#[derive(Clone, Debug, PartialEq)]
pub struct Case {
    pub name: String,
    pub simulation: Simulation,
    pub solver: Solver,
}

impl Case {
    /// Load a JSON5 case. Relative series file paths are resolved against the
    /// directory of the case file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let string = fs::read_to_string(path)?;
        let mut loaded: as_loaded::Case = json5::from_str(&string)?;

        if loaded.name.is_none() {
            loaded.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }
        if let Some(dir) = path.parent() {
            loaded.resolve_files(dir);
        }

        loaded.try_into()
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let loaded: as_loaded::Case = json5::from_str(json)?;
        let converted = loaded.try_into()?;
        Ok(converted)
    }

    pub fn run(&self) -> Result<SimulationResult, SolverError> {
        match &self.simulation {
            Simulation::Thermal(zone) => self.solver.calc_transient_room_temperature(zone),
            Simulation::ThermalCo2(zone) => self.solver.calc_transient_co2_temperature(zone),
            Simulation::Co2Only {
                zone,
                indoor_temperature,
            } => self.solver.calc_transient_co2(zone, indoor_temperature),
        }
    }

    pub fn steady_state(&self) -> Result<f64, UnderdeterminedZoneError> {
        self.simulation.thermal_zone().calc_steady_state_result()
    }
}

/// Run independent cases in parallel. Results keep the order of `cases`.
pub fn run_all(cases: &[Case]) -> Vec<Result<SimulationResult, SolverError>> {
    cases.par_iter().map(Case::run).collect()
}

impl TryFrom<as_loaded::Case> for Case {
    type Error = anyhow::Error;
    fn try_from(value: as_loaded::Case) -> Result<Self, Self::Error> {
        let name = value.name.unwrap_or_else(|| "zone".to_string());

        // Date-time series of one case share a single time origin
        let origin = match &value.start {
            Some(start) => Some(DateTime::parse_from_rfc3339(start).map_err(|error| {
                anyhow::anyhow!("Case {:?} has an invalid start {:?}: {}", name, start, error)
            })?),
            None => {
                let mut earliest: Option<DateTime<FixedOffset>> = None;
                for file in value.series.values().filter_map(|series| series.file.as_ref()) {
                    if let Some(start) = Timeseries::csv_start(file)? {
                        earliest = Some(earliest.map_or(start, |earliest| earliest.min(start)));
                    }
                }
                earliest
            }
        };
        if let Some(origin) = origin {
            debug!("Case {:?} counts date-times from {}", name, origin.to_rfc3339());
        }

        let series = value
            .series
            .into_iter()
            .map(|(name, series)| {
                let converted = series.convert(&name, origin)?;
                Ok((name, Arc::new(converted)))
            })
            .collect::<anyhow::Result<HashMap<_, _>>>()?;

        let ambients = value
            .ambients
            .into_iter()
            .map(|(name, temperature)| {
                let temperature = temperature.convert(&series)?;
                Ok((name.clone(), Arc::new(Ambient::new(name, temperature))))
            })
            .collect::<anyhow::Result<HashMap<_, _>>>()?;

        let outdoor = value
            .outdoor_temperature
            .map(|signal| signal.convert(&series))
            .transpose()?
            .map(BoundaryTemperature::Given);

        let mut zone = ThermalZone::new(name.clone(), value.volume)?;
        if let Some(air) = value.air {
            zone = zone.with_air(Air::new(air.density, air.specific_heat_capacity)?);
        }
        if let Some(capacity) = value.capacity {
            zone = zone.with_heat_capacity(capacity)?;
        }
        if let Some(temperature) = value.initial_temperature {
            zone = zone.with_initial_temperature(temperature);
        }
        if let Some(gain) = value.internal_gain {
            zone = zone.with_internal_gain(gain.convert(&series)?);
        }
        if let Some(heating_cooling) = value.heating_cooling {
            zone = zone.with_heating_cooling(heating_cooling.convert(&series)?);
        }

        let ventilation = match (value.ventilation, value.air_change_rate) {
            (Some(_), Some(_)) => {
                anyhow::bail!("Case {:?} sets both ventilation and air_change_rate", name)
            }
            (Some(ventilation), None) => Some((ventilation.air_change_rate, ventilation.exterior)),
            (None, Some(rate)) => Some((rate, None)),
            (None, None) => None,
        };
        if let Some((rate, exterior)) = ventilation {
            let exterior: Option<BoundaryTemperature> = match exterior {
                Some(as_loaded::Exterior::Ambient(ambient)) => {
                    Some(get(&ambients, &ambient, "ambient")?.into())
                }
                Some(as_loaded::Exterior::Temperature(signal)) => {
                    Some(signal.convert(&series)?.into())
                }
                Some(as_loaded::Exterior::Surface(_)) => {
                    anyhow::bail!("Ventilation of {:?} cannot exchange air with a surface", name)
                }
                None => outdoor.clone(),
            };
            let Some(exterior) = exterior else {
                anyhow::bail!(
                    "Ventilation of {:?} has no exterior and no outdoor_temperature",
                    name
                )
            };
            let air = value.air.unwrap_or_default();
            zone = zone.with_ventilation(
                Ventilation::new(rate.convert(&series)?, exterior).with_air(air),
            );
        }

        for wall in value.walls {
            zone.add_element(wall.convert(false, &series, &ambients, outdoor.as_ref())?);
        }
        for window in value.windows {
            zone.add_element(window.convert(true, &series, &ambients, outdoor.as_ref())?);
        }

        let simulation = match (value.co2, value.indoor_temperature) {
            (None, None) => Simulation::Thermal(zone),
            (None, Some(_)) => {
                anyhow::bail!("Case {:?} sets indoor_temperature without co2", name)
            }
            (Some(co2), None) => Simulation::ThermalCo2(ThermalCo2Zone::new(
                zone,
                co2.convert(&series)?,
            )),
            (Some(co2), Some(indoor_temperature)) => Simulation::Co2Only {
                zone: ThermalCo2Zone::new(zone, co2.convert(&series)?),
                indoor_temperature: indoor_temperature.convert(&series)?,
            },
        };

        debug!(
            "Loaded case {:?}: {} elements, {} series, {} ambients",
            name,
            simulation.thermal_zone().elements().len(),
            series.len(),
            ambients.len()
        );

        Ok(Case {
            name,
            simulation,
            solver: Solver::new(value.timestep, value.t_end).with_integration(value.integration),
        })
    }
}

fn get<K, V, Q>(h: &HashMap<K, Arc<V>>, key: &Q, label: &str) -> anyhow::Result<Arc<V>>
where
    K: std::borrow::Borrow<Q>,
    K: std::hash::Hash + std::cmp::Eq,
    Q: std::hash::Hash + std::cmp::Eq + std::fmt::Debug + ?Sized,
{
    Ok(Arc::clone(h.get(key).ok_or_else(|| {
        anyhow::anyhow!("Could not find {} {:?}", label, key)
    })?))
}

mod as_loaded {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use chrono::{DateTime, FixedOffset};
    use serde::Deserialize;
    use uom::si::f64::{Area, HeatCapacity, HeatTransfer, Length, Time, Volume};

    use super::get;
    use crate::ambient::{Ambient, BoundaryTemperature};
    use crate::element::{Orientation, WindowOpening};
    use crate::solver::Integration;
    use crate::timeseries::{Interpolation, Signal, Timeseries};
    use crate::ventilation::Air;
    use crate::zone::{Co2Sources, OUTDOOR_CO2_CONCENTRATION};

    #[derive(Clone, Debug, Deserialize)]
    pub struct Case {
        pub name: Option<String>,
        /// RFC 3339 date-time of t = 0
        pub start: Option<String>,
        #[serde(default)]
        pub series: HashMap<String, Series>,
        #[serde(default)]
        pub ambients: HashMap<String, SignalRef>,
        pub volume: Volume,
        pub capacity: Option<HeatCapacity>,
        pub air: Option<Air>,
        pub initial_temperature: Option<f64>,
        pub internal_gain: Option<SignalRef>,
        pub heating_cooling: Option<SignalRef>,
        pub ventilation: Option<Ventilation>,
        pub air_change_rate: Option<SignalRef>,
        pub outdoor_temperature: Option<SignalRef>,
        pub indoor_temperature: Option<SignalRef>,
        pub co2: Option<Co2>,
        #[serde(default)]
        pub walls: Vec<Element>,
        #[serde(default)]
        pub windows: Vec<Element>,
        pub timestep: Time,
        pub t_end: Time,
        #[serde(default)]
        pub integration: Integration,
    }

    impl Case {
        pub fn resolve_files(&mut self, dir: &Path) {
            for series in self.series.values_mut() {
                if let Some(file) = series.file.as_mut() {
                    if file.is_relative() {
                        *file = dir.join(&file);
                    }
                }
            }
        }
    }

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    pub struct Series {
        pub samples: Option<Vec<(f64, f64)>>,
        pub file: Option<PathBuf>,
        #[serde(default)]
        pub interpolation: Interpolation,
    }

    impl Series {
        pub fn convert(
            self,
            name: &str,
            origin: Option<DateTime<FixedOffset>>,
        ) -> anyhow::Result<Timeseries> {
            match (self.samples, self.file) {
                (Some(samples), None) => Ok(Timeseries::new(samples, self.interpolation)?),
                (None, Some(file)) => {
                    Ok(Timeseries::from_csv_since(file, self.interpolation, origin)?)
                }
                _ => anyhow::bail!("Series {:?} needs exactly one of samples or file", name),
            }
        }
    }

    /// Number or name of a series.
    #[derive(Clone, Debug, Deserialize, PartialEq)]
    #[serde(untagged)]
    pub enum SignalRef {
        Constant(f64),
        Series(String),
    }

    impl SignalRef {
        pub fn convert(self, series: &HashMap<String, Arc<Timeseries>>) -> anyhow::Result<Signal> {
            Ok(match self {
                SignalRef::Constant(value) => Signal::Constant(value),
                SignalRef::Series(name) => Signal::Series(get(series, &name, "series")?),
            })
        }
    }

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "lowercase")]
    pub enum Exterior {
        Ambient(String),
        Temperature(SignalRef),
        Surface(SignalRef),
    }

    impl Exterior {
        pub fn convert(
            self,
            series: &HashMap<String, Arc<Timeseries>>,
            ambients: &HashMap<String, Arc<Ambient>>,
        ) -> anyhow::Result<super::Exterior> {
            Ok(match self {
                Exterior::Ambient(name) => {
                    super::Exterior::Air(get(ambients, &name, "ambient")?.into())
                }
                Exterior::Temperature(signal) => {
                    super::Exterior::Air(signal.convert(series)?.into())
                }
                Exterior::Surface(signal) => super::Exterior::Surface(signal.convert(series)?),
            })
        }
    }

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    pub struct Ventilation {
        pub air_change_rate: SignalRef,
        pub exterior: Option<Exterior>,
    }

    /// Wall or window.
    #[derive(Clone, Debug, Deserialize, PartialEq)]
    pub struct Element {
        pub name: String,
        pub area: Area,
        pub u_value: HeatTransfer,
        #[serde(default)]
        pub r_si: f64,
        #[serde(default)]
        pub r_se: f64,
        #[serde(default)]
        pub orientation: Orientation,
        pub exterior: Option<Exterior>,
        pub interior: Option<f64>,
        /// Windows only
        pub height: Option<Length>,
        /// Windows only, closed when missing
        pub open: Option<SignalRef>,
    }

    impl Element {
        pub fn convert(
            self,
            is_window: bool,
            series: &HashMap<String, Arc<Timeseries>>,
            ambients: &HashMap<String, Arc<Ambient>>,
            outdoor: Option<&BoundaryTemperature>,
        ) -> anyhow::Result<super::ConductiveElement> {
            let exterior = match (self.exterior, outdoor) {
                (Some(exterior), _) => exterior.convert(series, ambients)?,
                (None, Some(outdoor)) => super::Exterior::Air(outdoor.clone()),
                (None, None) => anyhow::bail!(
                    "Element {:?} has no exterior and no outdoor_temperature",
                    self.name
                ),
            };

            let element = if is_window {
                let Some(height) = self.height else {
                    anyhow::bail!("Window {:?} has no height", self.name)
                };
                let state = self
                    .open
                    .map(|open| open.convert(series))
                    .transpose()?
                    .unwrap_or_default();
                super::ConductiveElement::window(
                    self.name,
                    self.area,
                    self.u_value,
                    exterior,
                    WindowOpening { height, state },
                )?
            } else {
                if self.height.is_some() || self.open.is_some() {
                    anyhow::bail!("Wall {:?} cannot have a height or open state", self.name)
                }
                super::ConductiveElement::wall(self.name, self.area, self.u_value, exterior)?
            };

            let element = element
                .with_surface_resistances(self.r_si, self.r_se)?
                .with_orientation(self.orientation);
            Ok(match self.interior {
                Some(temperature) => element.with_interior(super::Interior::Pinned(temperature)),
                None => element,
            })
        }
    }

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    pub struct Co2 {
        #[serde(default = "outdoor_concentration")]
        pub initial_concentration: f64,
        pub n_persons: Option<SignalRef>,
        #[serde(default)]
        pub emission_rate: f64,
        pub internal_co2_source: Option<SignalRef>,
        pub ambient_concentration: Option<SignalRef>,
    }

    fn outdoor_concentration() -> f64 {
        OUTDOOR_CO2_CONCENTRATION
    }

    impl Co2 {
        pub fn convert(
            self,
            series: &HashMap<String, Arc<Timeseries>>,
        ) -> anyhow::Result<Co2Sources> {
            let or_constant = |signal: Option<SignalRef>, default: f64| -> anyhow::Result<Signal> {
                Ok(match signal {
                    Some(signal) => signal.convert(series)?,
                    None => Signal::Constant(default),
                })
            };
            Ok(Co2Sources {
                initial_concentration: self.initial_concentration,
                n_persons: or_constant(self.n_persons, 0.0)?,
                emission_rate: self.emission_rate,
                internal_source: or_constant(self.internal_co2_source, 0.0)?,
                ambient_concentration: or_constant(
                    self.ambient_concentration,
                    OUTDOOR_CO2_CONCENTRATION,
                )?,
            })
        }
    }
}
