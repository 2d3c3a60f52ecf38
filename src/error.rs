use thiserror::Error;

/// Problems with the samples a [`Timeseries`](crate::timeseries::Timeseries) is built from.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedSeriesError {
    #[error("timeseries has no samples")]
    Empty,

    /// Timestamps must be strictly increasing, duplicates included.
    #[error("timestamp {current} at sample {index} does not follow {previous}")]
    NonIncreasing {
        index: usize,
        previous: f64,
        current: f64,
    },

    #[error("sample {index} is not a finite number")]
    NonFinite { index: usize },
}

/// Errors reading a timeseries from tabular records.
#[derive(Debug, Error)]
pub enum SeriesReadError {
    #[error("could not read records: {0}")]
    Csv(#[from] csv::Error),

    #[error("line {line}: cannot interpret {value:?} as a timestamp")]
    Timestamp { line: u64, value: String },

    #[error("line {line}: cannot interpret {value:?} as a value")]
    Value { line: u64, value: String },

    #[error(transparent)]
    Malformed(#[from] MalformedSeriesError),
}

/// The thermal balance of a zone has no well-posed equilibrium.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("zone {zone:?} is not coupled to any boundary temperature, steady state is undefined")]
pub struct UnderdeterminedZoneError {
    pub zone: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "timestep ({timestep} s) and end time ({t_end} s) must be positive and finite, \
     with at most {max_steps} steps between them",
    max_steps = crate::solver::MAX_STEPS
)]
pub struct InvalidStepError {
    pub timestep: f64,
    pub t_end: f64,
}

/// Violated construction-time invariant of a model component.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("{owner}: {quantity} must be positive, got {value}")]
    NonPositive {
        owner: String,
        quantity: &'static str,
        value: f64,
    },

    #[error("{owner}: {quantity} must not be negative, got {value}")]
    Negative {
        owner: String,
        quantity: &'static str,
        value: f64,
    },
}

impl ParameterError {
    /// Return an error unless `value` is positive (and not NaN).
    pub(crate) fn check_positive(
        owner: &str,
        quantity: &'static str,
        value: f64,
    ) -> Result<(), Self> {
        if value > 0.0 {
            Ok(())
        } else {
            Err(ParameterError::NonPositive {
                owner: owner.into(),
                quantity,
                value,
            })
        }
    }

    pub(crate) fn check_non_negative(
        owner: &str,
        quantity: &'static str,
        value: f64,
    ) -> Result<(), Self> {
        if value >= 0.0 {
            Ok(())
        } else {
            Err(ParameterError::Negative {
                owner: owner.into(),
                quantity,
                value,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error(transparent)]
    InvalidStep(#[from] InvalidStepError),

    #[error(transparent)]
    Underdetermined(#[from] UnderdeterminedZoneError),
}
