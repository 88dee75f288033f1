use burn::tensor::{backend::Backend, Tensor};
use polars::error::PolarsError;
use thiserror::Error;

/// Errors raised by the forecasting core.
///
/// Configuration errors are raised while building modules and are never deferred to the
/// first forward pass. Shape and device errors abort the current pass.
#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Device mismatch: {0}")]
    DeviceMismatch(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

impl ForecastError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        ForecastError::Configuration(message.into())
    }

    pub fn shape<S: Into<String>>(message: S) -> Self {
        ForecastError::ShapeMismatch(message.into())
    }

    pub fn data<S: Into<String>>(message: S) -> Self {
        ForecastError::Data(message.into())
    }

    pub fn checkpoint<S: Into<String>>(message: S) -> Self {
        ForecastError::Checkpoint(message.into())
    }
}

/// Rejects tensors of one pass that live on different devices.
pub fn ensure_same_device<B: Backend, const D1: usize, const D2: usize>(
    left: &Tensor<B, D1>,
    right: &Tensor<B, D2>,
    context: &str,
) -> Result<(), ForecastError> {
    let (left_device, right_device) = (left.device(), right.device());
    if left_device != right_device {
        return Err(ForecastError::DeviceMismatch(format!(
            "{}: {:?} vs {:?}",
            context, left_device, right_device
        )));
    }
    Ok(())
}
