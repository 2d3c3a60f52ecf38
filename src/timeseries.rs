use std::io;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use itertools::Itertools;
use serde::Deserialize;
use uom::si::{f64::Time, time::second};

use crate::error::{MalformedSeriesError, SeriesReadError};

/// How a [`Timeseries`] is evaluated between its samples.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Zero-order hold: the latest sample at or before the query time.
    #[default]
    Previous,
    /// Piecewise-linear between the two bracketing samples.
    Linear,
}

/// Sampled signal with strictly increasing timestamps (in seconds).
///
/// Queries outside of the sampled range are clamped to the first or last sample.
/// There is no way to modify a series once built, so it can be shared freely
/// between components (see [`Signal`]).
#[derive(Clone, Debug, PartialEq)]
pub struct Timeseries {
    times: Vec<f64>,
    values: Vec<f64>,
    interpolation: Interpolation,
}

impl Timeseries {
    pub fn new<I>(samples: I, interpolation: Interpolation) -> Result<Self, MalformedSeriesError>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let (times, values): (Vec<_>, Vec<_>) = samples.into_iter().unzip();

        if times.is_empty() {
            return Err(MalformedSeriesError::Empty);
        }
        if let Some(index) = times
            .iter()
            .zip(values.iter())
            .position(|(t, v)| !t.is_finite() || !v.is_finite())
        {
            return Err(MalformedSeriesError::NonFinite { index });
        }
        if let Some((index, (previous, current))) = times
            .iter()
            .tuple_windows()
            .enumerate()
            .find(|(_, (previous, current))| current <= previous)
        {
            return Err(MalformedSeriesError::NonIncreasing {
                index: index + 1,
                previous: *previous,
                current: *current,
            });
        }

        Ok(Timeseries {
            times,
            values,
            interpolation,
        })
    }

    /// Read a two column (timestamp, value) table with a header row.
    ///
    /// Timestamps are either seconds or RFC 3339 date-times. Date-times are converted
    /// to seconds elapsed since the first date-time in the file. Series that have to
    /// line up with each other should use [`Timeseries::from_csv_since`].
    pub fn from_csv<P: AsRef<Path>>(
        path: P,
        interpolation: Interpolation,
    ) -> Result<Self, SeriesReadError> {
        Self::from_csv_since(path, interpolation, None)
    }

    /// Like [`Timeseries::from_csv`], counting date-times from `origin` when given.
    pub fn from_csv_since<P: AsRef<Path>>(
        path: P,
        interpolation: Interpolation,
        origin: Option<DateTime<FixedOffset>>,
    ) -> Result<Self, SeriesReadError> {
        Self::read_records(csv_reader().from_path(path)?, interpolation, origin)
    }

    /// Same as [`Timeseries::from_csv`], reading from an arbitrary source.
    pub fn from_reader<R: io::Read>(
        reader: R,
        interpolation: Interpolation,
    ) -> Result<Self, SeriesReadError> {
        Self::from_reader_since(reader, interpolation, None)
    }

    pub fn from_reader_since<R: io::Read>(
        reader: R,
        interpolation: Interpolation,
        origin: Option<DateTime<FixedOffset>>,
    ) -> Result<Self, SeriesReadError> {
        Self::read_records(csv_reader().from_reader(reader), interpolation, origin)
    }

    /// Date-time of the first record of a CSV table, `None` if it is given in seconds.
    pub fn csv_start<P: AsRef<Path>>(
        path: P,
    ) -> Result<Option<DateTime<FixedOffset>>, SeriesReadError> {
        let mut reader = csv_reader().from_path(path)?;
        let Some(record) = reader.records().next() else {
            return Err(MalformedSeriesError::Empty.into());
        };
        let record = record?;
        let timestamp = record.get(0).unwrap_or_default();
        if timestamp.parse::<f64>().is_ok() {
            return Ok(None);
        }
        DateTime::parse_from_rfc3339(timestamp)
            .map(Some)
            .map_err(|_| SeriesReadError::Timestamp {
                line: record.position().map_or(0, |position| position.line()),
                value: timestamp.into(),
            })
    }

    fn read_records<R: io::Read>(
        mut reader: csv::Reader<R>,
        interpolation: Interpolation,
        mut origin: Option<DateTime<FixedOffset>>,
    ) -> Result<Self, SeriesReadError> {
        let mut samples = Vec::new();

        for record in reader.records() {
            let record = record?;
            let line = record.position().map_or(0, |position| position.line());
            let timestamp = record.get(0).unwrap_or_default();
            let value = record.get(1).unwrap_or_default();

            let time = parse_timestamp(timestamp, &mut origin).ok_or_else(|| {
                SeriesReadError::Timestamp {
                    line,
                    value: timestamp.into(),
                }
            })?;
            let value = value.parse::<f64>().map_err(|_| SeriesReadError::Value {
                line,
                value: value.into(),
            })?;
            samples.push((time, value));
        }

        Ok(Self::new(samples, interpolation)?)
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Always false, empty series can't be constructed.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Iterate over the (seconds, value) samples.
    pub fn samples(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.times.iter().copied().zip(self.values.iter().copied())
    }

    pub fn value_at(&self, time: Time) -> f64 {
        let t = time.get::<second>();
        let last = self.times.len() - 1;

        // Index of the first sample strictly after t
        let after = self.times.partition_point(|&sample_time| sample_time <= t);
        if after == 0 {
            return self.values[0];
        }
        if after > last {
            return self.values[last];
        }

        let before = after - 1;
        match self.interpolation {
            Interpolation::Previous => self.values[before],
            Interpolation::Linear => {
                let (t0, t1) = (self.times[before], self.times[after]);
                let (v0, v1) = (self.values[before], self.values[after]);
                v0 + (v1 - v0) * (t - t0) / (t1 - t0)
            }
        }
    }
}

fn csv_reader() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.trim(csv::Trim::All);
    builder
}

fn parse_timestamp(field: &str, origin: &mut Option<DateTime<FixedOffset>>) -> Option<f64> {
    if let Ok(seconds) = field.parse::<f64>() {
        return Some(seconds);
    }
    let datetime = DateTime::parse_from_rfc3339(field).ok()?;
    let origin = *origin.get_or_insert(datetime);
    Some((datetime - origin).num_milliseconds() as f64 / 1000.0)
}

/// Model input that is either constant or follows a shared [`Timeseries`].
#[derive(Clone, Debug, PartialEq)]
pub enum Signal {
    Constant(f64),
    Series(Arc<Timeseries>),
}

impl Signal {
    pub fn value_at(&self, time: Time) -> f64 {
        match self {
            Signal::Constant(value) => *value,
            Signal::Series(series) => series.value_at(time),
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Signal::Constant(0.0)
    }
}

impl From<f64> for Signal {
    fn from(value: f64) -> Self {
        Signal::Constant(value)
    }
}

impl From<Timeseries> for Signal {
    fn from(series: Timeseries) -> Self {
        Signal::Series(Arc::new(series))
    }
}

impl From<Arc<Timeseries>> for Signal {
    fn from(series: Arc<Timeseries>) -> Self {
        Signal::Series(series)
    }
}
