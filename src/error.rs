use esp_idf_svc::sys::EspError;
use iotesla_core::ConsoleError;
use std::fmt;

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// Serial console error.
    ConsoleError(String),

    /// I2C error.
    I2cError(String),

    /// Peripherals error.
    PeripheralsError(String),

    /// Sensor error.
    SensorError(String),

    /// Storage error. Fatal when raised during bring-up.
    StorageError(String),
}

/// Implement the conversion from `EspError` to `AppError`.
impl From<EspError> for AppError {
    /// Convert an `EspError` to an `AppError`.
    ///
    /// # Parameters
    /// - `error`: The ESP-IDF error.
    ///
    /// # Returns
    /// The application error.
    fn from(error: EspError) -> Self {
        AppError::PeripheralsError(format!("ESP-IDF error: {:?}", error))
    }
}

/// Implement the conversion from `ConsoleError` to `AppError`.
impl From<ConsoleError> for AppError {
    fn from(error: ConsoleError) -> Self {
        AppError::ConsoleError(error.to_string())
    }
}

/// Implement the `Display` trait for `AppError`.
impl fmt::Display for AppError {
    /// Format the error message.
    ///
    /// # Parameters
    /// - `f`: The formatter.
    ///
    /// # Returns
    /// The result of the operation.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ConsoleError(msg) => write!(f, "Console error: {}", msg),
            AppError::I2cError(msg) => write!(f, "I2C error: {}", msg),
            AppError::PeripheralsError(msg) => write!(f, "Peripherals error: {}", msg),
            AppError::SensorError(msg) => write!(f, "Sensor error: {}", msg),
            AppError::StorageError(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

/// Implement the `Error` trait for `AppError`.
impl std::error::Error for AppError {}
