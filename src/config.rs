//! Experiment configuration
//!
//! An [`ExperimentConfig`] is validated once by its builder and passed by
//! reference into every training routine. It has no setters.

use std::convert::TryFrom;

use crate::error::{Error, Result};

/// Where tensors live during training.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Device {
    Cpu,
    /// Accepted in configurations, but no accelerator backend is compiled in.
    Accelerator,
}

impl Default for Device {
    fn default() -> Self {
        Device::Cpu
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawConfig"))]
pub struct ExperimentConfig {
    device: Device,
    learning_rate: f64,
    epochs: usize,
    log_interval: usize,
    batch_size: usize,
}

impl ExperimentConfig {
    pub fn builder() -> ExperimentConfigBuilder {
        ExperimentConfigBuilder::default()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    /// Number of batches between two progress log lines.
    pub fn log_interval(&self) -> usize {
        self.log_interval
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Fails with [`Error::DeviceUnavailable`] unless the device is the CPU.
    pub fn require_cpu(&self) -> Result<()> {
        match self.device {
            Device::Cpu => Ok(()),
            device => Err(Error::DeviceUnavailable(device)),
        }
    }
}

/// Builder for [`ExperimentConfig`], see [`ExperimentConfig::builder`].
#[derive(Clone, Debug)]
pub struct ExperimentConfigBuilder {
    device: Device,
    learning_rate: f64,
    epochs: usize,
    log_interval: usize,
    batch_size: usize,
}

impl Default for ExperimentConfigBuilder {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            learning_rate: 0.01,
            epochs: 10,
            log_interval: 100,
            batch_size: 64,
        }
    }
}

impl ExperimentConfigBuilder {
    pub fn device(self, device: Device) -> Self {
        Self { device, ..self }
    }

    pub fn learning_rate(self, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            ..self
        }
    }

    pub fn epochs(self, epochs: usize) -> Self {
        Self { epochs, ..self }
    }

    pub fn log_interval(self, log_interval: usize) -> Self {
        Self {
            log_interval,
            ..self
        }
    }

    pub fn batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// **Errors**
    /// - `learning_rate` is not finite and positive.
    /// - `epochs`, `log_interval` or `batch_size` is zero.
    pub fn build(&self) -> Result<ExperimentConfig> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be finite and positive, got {}",
                self.learning_rate
            )));
        }
        for &(name, value) in &[
            ("epochs", self.epochs),
            ("log_interval", self.log_interval),
            ("batch_size", self.batch_size),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{} must be positive", name)));
            }
        }
        Ok(ExperimentConfig {
            device: self.device,
            learning_rate: self.learning_rate,
            epochs: self.epochs,
            log_interval: self.log_interval,
            batch_size: self.batch_size,
        })
    }
}

/// Unvalidated field set, what deserialization produces before [`TryFrom`].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields))]
pub struct RawConfig {
    #[cfg_attr(feature = "serde", serde(default))]
    pub device: Device,
    pub learning_rate: f64,
    pub epochs: usize,
    pub log_interval: usize,
    #[cfg_attr(feature = "serde", serde(default = "default_batch_size"))]
    pub batch_size: usize,
}

#[cfg(feature = "serde")]
fn default_batch_size() -> usize {
    ExperimentConfigBuilder::default().batch_size
}

impl TryFrom<RawConfig> for ExperimentConfig {
    type Error = Error;

    fn try_from(raw: RawConfig) -> Result<Self> {
        ExperimentConfig::builder()
            .device(raw.device)
            .learning_rate(raw.learning_rate)
            .epochs(raw.epochs)
            .log_interval(raw.log_interval)
            .batch_size(raw.batch_size)
            .build()
    }
}
