use crate::error::AppError;
use crate::sensor::{BoardSensors, SupplyMonitor};
use crate::serial::SerialConsole;
use crate::storage::SpiffsStorage;
use esp_idf_svc::hal::i2c::I2cConfig;
use esp_idf_svc::hal::i2c::I2cDriver;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::prelude::*;
use iotesla_core::{Client, ClientConfig};
use log::{error, info};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

/// Sample period in milliseconds.
const SAMPLE_PERIOD_MS: u32 = 10;

/// Redraw every sample on the console.
const ECHO_SAMPLES: bool = false;

/// SPIFFS partition label.
const PARTITION_LABEL: &str = "storage";

/// Where the partition is mounted.
const MOUNT_POINT: &str = "/spiffs";

/// Log file name.
const LOG_FILE_NAME: &str = "sensor_data.bin";

/// Console bytes read per tick.
const INPUT_CHUNK: usize = 64;

/// The device manager interface.
pub struct DeviceManager<'a> {
  /// The data logger.
  client: Client<SpiffsStorage, BoardSensors<'a>>,

  /// The serial console.
  serial: SerialConsole<'a>,

  /// Boot time, for the uptime counter.
  boot: Instant,
}

/// The device manager implementation.
impl<'a> DeviceManager<'a> {
  /// Create a new device manager.
  ///
  /// # Parameters
  /// - `peripherals`: The ESP32 peripherals.
  ///
  /// # Returns
  /// The device manager.
  pub fn new(peripherals: Peripherals) -> Result<Self, AppError> {
    info!("Configuring IoTesla client");

    // Initialize the file system
    info!("- Initializing SPIFFS");
    let storage = SpiffsStorage::mount(PARTITION_LABEL, MOUNT_POINT, LOG_FILE_NAME)?;

    info!("- Setting up I2C bus");
    let config = I2cConfig::default().baudrate(400.kHz().into());

    let sda = peripherals.pins.gpio8;

    let scl = peripherals.pins.gpio9;

    let i2c = Rc::new(RefCell::new(
      I2cDriver::new(peripherals.i2c0, sda, scl, &config)
        .map_err(|e| AppError::I2cError(format!("Failed to initialize I2C: {:?}", e)))?
    ));

    // Initialize sensors
    let supply = SupplyMonitor::new(peripherals.adc1, peripherals.pins.gpio0)?;
    let sensors = BoardSensors::new(Rc::clone(&i2c), supply)?;

    // Initialize console
    let serial = SerialConsole::new(
      peripherals.uart0,
      peripherals.pins.gpio21,
      peripherals.pins.gpio20,
    )?;

    let config = ClientConfig {
      sample_period_ms: SAMPLE_PERIOD_MS,
      echo_samples: ECHO_SAMPLES,
    };
    let mut client = Client::new(config, storage, sensors);
    client.connect();

    info!("Sampling every {} ms", client.config().sample_period_ms);

    info!("Console ready, commands: print, delete, status");

    Ok(Self {
      client,
      serial,
      boot: Instant::now(),
    })
  }

  /// Run one scheduler tick.
  ///
  /// # Returns
  /// The result of the operation.
  pub fn update(&mut self) -> Result<(), AppError> {
    let mut input = [0u8; INPUT_CHUNK];
    let received = match self.serial.read_available(&mut input) {
      Ok(received) => received,
      Err(e) => {
        error!("{}", e);
        0
      }
    };

    // Storage failures and the full latch are logged by the client.
    if let Err(e) = self.client.poll(self.uptime_ms(), &input[..received], &mut self.serial) {
      error!("Console failed: {}", AppError::from(e));
    }

    Ok(())
  }

  /// Milliseconds since boot. Wraps after about 49 days.
  fn uptime_ms(&self) -> u32 {
    self.boot.elapsed().as_millis() as u32
  }
}
