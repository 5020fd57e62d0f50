//! Error type shared by every module of the crate

use crate::config::Device;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A space, operator or functional was combined with one of the wrong shape.
    #[error("dimension mismatch in {context}: expected {expected:?}, found {found:?}")]
    DimensionMismatch {
        context: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    /// A solver convergence precondition does not hold.
    #[error("step sizes violate {inequality}: got {value} with {}", format_operands(.operands))]
    StepSize {
        inequality: &'static str,
        value: f64,
        bound: f64,
        operands: Vec<(&'static str, f64)>,
    },
    #[error("invalid parameter `{name}` = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
    /// Power iteration started from zero or from a vector in the operator's kernel.
    #[error("power iteration seed is zero or lies in the kernel of the operator")]
    DegenerateSeed,
    #[error("device {0:?} is not available in this build")]
    DeviceUnavailable(Device),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("dataset error: {0}")]
    Dataset(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn format_operands(operands: &[(&'static str, f64)]) -> String {
    operands
        .iter()
        .map(|(name, value)| format!("{} = {}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    pub(crate) fn mismatch(context: &'static str, expected: &[usize], found: &[usize]) -> Self {
        Error::DimensionMismatch {
            context,
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    pub(crate) fn invalid<A: num_traits::ToPrimitive>(
        name: &'static str,
        value: A,
        reason: &'static str,
    ) -> Self {
        Error::InvalidParameter {
            name,
            value: value.to_f64().unwrap_or(f64::NAN),
            reason,
        }
    }
}
