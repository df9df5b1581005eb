mod device;
mod error;
mod sensor;
mod serial;
mod storage;

use crate::device::DeviceManager;
use crate::error::AppError;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::prelude::*;
use esp_idf_svc::log::EspLogger;
use esp_idf_svc::sys::link_patches;
use log::info;

/// Scheduler tick interval in milliseconds.
const TICK_INTERVAL_MS: u32 = 1;

/// This function initializes the system and starts the main loop.
///
/// # Returns
/// The result of the operation. Storage or sensor bring-up failures end
/// here and halt the device.
fn main() -> Result<(), AppError> {
  // Initialize system
  link_patches();
  EspLogger::initialize_default();
  info!("Starting the IoTesla client...");

  let peripherals = Peripherals::take()
    .map_err(|_| AppError::PeripheralsError("Failed to acquire ESP32 peripherals".into()))?;

  // Initialize device manager
  let mut manager = DeviceManager::new(peripherals)?;

  // Main loop
  loop {
    manager.update()?;
    FreeRtos::delay_ms(TICK_INTERVAL_MS);
  }
}
