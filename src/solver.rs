use std::io;

use log::{info, warn};
use serde::Deserialize;
use uom::si::{f64::Time, time::second};

use crate::error::{InvalidStepError, SolverError};
use crate::timeseries::Signal;
use crate::zone::{LinearBalance, ThermalCo2Zone, ThermalZone, ZoneState};

/// Largest number of steps a single run may take.
pub const MAX_STEPS: usize = 100_000_000;

/// Time stepping scheme.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Integration {
    /// Forward Euler, `x_{k+1} = x_k + dt * f(t_k, x_k)`.
    #[default]
    Explicit,
    /// Backward Euler on the balance at `t_{k+1}`. Stable for any step.
    Implicit,
}

/// One output sample.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Sample {
    pub time: Time,
    /// [°C]
    pub temperature: f64,
    /// [ppm], only for runs that track CO2
    pub co2_concentration: Option<f64>,
}

/// Ordered samples of one simulation run, from t = 0 to the end time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimulationResult {
    samples: Vec<Sample>,
}

impl SimulationResult {
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn temperatures(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|sample| sample.temperature)
    }

    pub fn co2_concentrations(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples
            .iter()
            .filter_map(|sample| sample.co2_concentration)
    }

    /// Write `time,temperature[,co2]` records, time in seconds.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> csv::Result<()> {
        let with_co2 = self
            .samples
            .first()
            .is_some_and(|sample| sample.co2_concentration.is_some());
        let mut writer = csv::Writer::from_writer(writer);

        if with_co2 {
            writer.write_record(["time", "temperature", "co2"])?;
        } else {
            writer.write_record(["time", "temperature"])?;
        }
        for sample in self.samples.iter() {
            let time = sample.time.get::<second>().to_string();
            let temperature = sample.temperature.to_string();
            match sample.co2_concentration {
                Some(co2) if with_co2 => {
                    writer.write_record([time, temperature, co2.to_string()])?
                }
                _ => writer.write_record([time, temperature])?,
            }
        }
        writer.flush()?;
        Ok(())
    }
}

impl<'a> IntoIterator for &'a SimulationResult {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

impl IntoIterator for SimulationResult {
    type Item = Sample;
    type IntoIter = std::vec::IntoIter<Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

/// Fixed step time integration of zone balances over `[0, t_end]`.
///
/// The solver owns the integrated state, zones are only read.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Solver {
    timestep: Time,
    t_end: Time,
    integration: Integration,
}

impl Solver {
    pub fn new(timestep: Time, t_end: Time) -> Self {
        Solver {
            timestep,
            t_end,
            integration: Integration::default(),
        }
    }

    pub fn with_integration(mut self, integration: Integration) -> Self {
        self.integration = integration;
        self
    }

    pub fn timestep(&self) -> Time {
        self.timestep
    }

    pub fn t_end(&self) -> Time {
        self.t_end
    }

    /// Step length in seconds and the number of whole steps that fit before `t_end`.
    fn grid(&self) -> Result<(f64, usize), InvalidStepError> {
        let timestep = self.timestep.get::<second>();
        let t_end = self.t_end.get::<second>();
        let invalid = InvalidStepError { timestep, t_end };
        if !(timestep > 0.0 && t_end > 0.0 && timestep.is_finite() && t_end.is_finite()) {
            return Err(invalid);
        }
        // Tolerance keeps 3600 / 60 from truncating to 59 after rounding
        let steps = (t_end / timestep * (1.0 + 1e-12)).floor();
        if steps > MAX_STEPS as f64 {
            return Err(invalid);
        }
        Ok((timestep, steps as usize))
    }

    fn advance<F>(&self, x: f64, k: usize, timestep: f64, balance_at: F) -> f64
    where
        F: Fn(Time) -> LinearBalance,
    {
        match self.integration {
            Integration::Explicit => {
                x + timestep * balance_at(at(k, timestep)).derivative(x)
            }
            Integration::Implicit => balance_at(at(k + 1, timestep)).implicit_step(x, timestep),
        }
    }

    /// Whether forward Euler with this step diverges on `balance`.
    fn exceeds_stability_limit(&self, balance: LinearBalance, timestep: f64) -> bool {
        self.integration == Integration::Explicit
            && balance.loss_coefficient > 0.0
            && timestep > 2.0 * balance.time_constant()
    }

    fn check_stability(&self, label: &str, zone: &str, balance: LinearBalance, timestep: f64) {
        if self.exceeds_stability_limit(balance, timestep) {
            warn!(
                "Explicit {} step of {} s for zone {:?} exceeds the stability limit of {:.1} s",
                label,
                timestep,
                zone,
                2.0 * balance.time_constant()
            );
        }
    }

    /// Integrate the thermal balance only.
    pub fn calc_transient_room_temperature(
        &self,
        zone: &ThermalZone,
    ) -> Result<SimulationResult, SolverError> {
        let (timestep, steps) = self.grid()?;
        let mut temperature = zone.starting_temperature()?;

        info!(
            "Integrating temperature of zone {:?}: {} steps of {} s",
            zone.name, steps, timestep
        );
        self.check_stability(
            "thermal",
            &zone.name,
            zone.thermal_balance_at(at(0, timestep)),
            timestep,
        );

        let mut samples = Vec::with_capacity(steps + 1);
        samples.push(Sample {
            time: at(0, timestep),
            temperature,
            co2_concentration: None,
        });
        for k in 0..steps {
            temperature = self.advance(temperature, k, timestep, |t| zone.thermal_balance_at(t));
            samples.push(Sample {
                time: at(k + 1, timestep),
                temperature,
                co2_concentration: None,
            });
        }

        info!("Zone {:?} finished at {:.3} °C", zone.name, temperature);
        Ok(SimulationResult { samples })
    }

    /// Integrate thermal and CO2 balances in lock-step.
    ///
    /// Both balances of step `k + 1` are computed from the state of step `k`.
    pub fn calc_transient_co2_temperature(
        &self,
        zone: &ThermalCo2Zone,
    ) -> Result<SimulationResult, SolverError> {
        let (timestep, steps) = self.grid()?;
        let thermal = zone.thermal();
        let mut state = zone.initial_state()?;

        info!(
            "Integrating temperature and CO2 of zone {:?}: {} steps of {} s",
            thermal.name, steps, timestep
        );
        self.check_stability(
            "thermal",
            &thermal.name,
            thermal.thermal_balance_at(at(0, timestep)),
            timestep,
        );
        self.check_stability(
            "CO2",
            &thermal.name,
            zone.co2_balance_at(at(0, timestep), state.temperature),
            timestep,
        );

        let mut samples = Vec::with_capacity(steps + 1);
        samples.push(co2_sample(at(0, timestep), state));
        for k in 0..steps {
            let previous = state;
            state = ZoneState {
                temperature: self.advance(previous.temperature, k, timestep, |t| {
                    thermal.thermal_balance_at(t)
                }),
                co2_concentration: self.advance(previous.co2_concentration, k, timestep, |t| {
                    zone.co2_balance_at(t, previous.temperature)
                }),
            };
            samples.push(co2_sample(at(k + 1, timestep), state));
        }

        info!(
            "Zone {:?} finished at {:.3} °C, {:.0} ppm",
            thermal.name, state.temperature, state.co2_concentration
        );
        Ok(SimulationResult { samples })
    }

    /// Integrate the CO2 balance only, with a prescribed zone temperature.
    pub fn calc_transient_co2(
        &self,
        zone: &ThermalCo2Zone,
        indoor_temperature: &Signal,
    ) -> Result<SimulationResult, SolverError> {
        let (timestep, steps) = self.grid()?;
        let name = &zone.thermal().name;
        let mut concentration = zone.co2().initial_concentration;

        info!(
            "Integrating CO2 of zone {:?} at prescribed temperature: {} steps of {} s",
            name, steps, timestep
        );
        let start = at(0, timestep);
        self.check_stability(
            "CO2",
            name,
            zone.co2_balance_at(start, indoor_temperature.value_at(start)),
            timestep,
        );

        let sample = |time: Time, concentration: f64| {
            co2_sample(
                time,
                ZoneState {
                    temperature: indoor_temperature.value_at(time),
                    co2_concentration: concentration,
                },
            )
        };

        let mut samples = Vec::with_capacity(steps + 1);
        samples.push(sample(start, concentration));
        for k in 0..steps {
            let temperature = indoor_temperature.value_at(at(k, timestep));
            concentration = self.advance(concentration, k, timestep, |t| {
                zone.co2_balance_at(t, temperature)
            });
            samples.push(sample(at(k + 1, timestep), concentration));
        }

        info!("Zone {:?} finished at {:.0} ppm", name, concentration);
        Ok(SimulationResult { samples })
    }
}

/// Time of step `k`.
fn at(k: usize, timestep: f64) -> Time {
    Time::new::<second>(k as f64 * timestep)
}

fn co2_sample(time: Time, state: ZoneState) -> Sample {
    Sample {
        time,
        temperature: state.temperature,
        co2_concentration: Some(state.co2_concentration),
    }
}
