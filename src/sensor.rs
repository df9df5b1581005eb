use crate::error::AppError;
use esp_idf_svc::hal::adc::attenuation::DB_11;
use esp_idf_svc::hal::adc::oneshot::config::AdcChannelConfig;
use esp_idf_svc::hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
use esp_idf_svc::hal::adc::ADC1;
use esp_idf_svc::hal::gpio::Gpio0;
use esp_idf_svc::hal::i2c::I2cDriver;
use iotesla_core::{Reading, Sensor};
use log::warn;
use std::cell::RefCell;
use std::rc::Rc;

#[cfg(feature = "motion")]
use iotesla_core::Motion;

/// I2C transaction timeout in ticks.
const I2C_TIMEOUT: u32 = 100;

/// BME280 I2C address.
const BME280_ADDRESS: u8 = 0x77;

/// BME280 chip id register and expected value.
const BME280_REG_CHIP_ID: u8 = 0xd0;
const BME280_CHIP_ID: u8 = 0x60;

/// BME280 control registers.
const BME280_REG_CTRL_HUM: u8 = 0xf2;
const BME280_REG_CTRL_MEAS: u8 = 0xf4;
const BME280_REG_CONFIG: u8 = 0xf5;

/// BME280 data and calibration registers.
const BME280_REG_DATA: u8 = 0xf7;
const BME280_REG_CALIB_TP: u8 = 0x88;
const BME280_REG_CALIB_H1: u8 = 0xa1;
const BME280_REG_CALIB_H2: u8 = 0xe1;

/// Oversampling x16 on every channel.
const BME280_OVERSAMPLE: u8 = 5;

/// IIR filter coefficient 16.
const BME280_FILTER: u8 = 4;

/// 0.5 ms between measurements in normal mode.
const BME280_STANDBY: u8 = 0;

/// Normal mode.
const BME280_MODE_NORMAL: u8 = 3;

/// Sea level pressure in pascal, for the altitude estimate.
const SEA_LEVEL_PA: f64 = 101_325.0;

/// MPU6050 I2C address.
#[cfg(feature = "motion")]
const MPU6050_ADDRESS: u8 = 0x68;

/// MPU6050 registers.
#[cfg(feature = "motion")]
const MPU6050_REG_WHO_AM_I: u8 = 0x75;
#[cfg(feature = "motion")]
const MPU6050_REG_PWR_MGMT_1: u8 = 0x6b;
#[cfg(feature = "motion")]
const MPU6050_REG_GYRO_CONFIG: u8 = 0x1b;
#[cfg(feature = "motion")]
const MPU6050_REG_ACCEL_CONFIG: u8 = 0x1c;
#[cfg(feature = "motion")]
const MPU6050_REG_ACCEL_XOUT_H: u8 = 0x3b;

/// Clock from the X gyro PLL, sleep off.
#[cfg(feature = "motion")]
const MPU6050_CLOCK_PLL_XGYRO: u8 = 0x01;

/// +/-16 g.
#[cfg(feature = "motion")]
const MPU6050_ACCEL_FS_16: u8 = 0x18;

/// +/-2000 deg/s.
#[cfg(feature = "motion")]
const MPU6050_GYRO_FS_2000: u8 = 0x18;

/// Resistor divider between the supply rail and the ADC pin.
const SUPPLY_DIVIDER: f32 = 2.0;

/// Read `buffer.len()` bytes starting at `register`.
fn read_registers(
  i2c: &mut I2cDriver<'_>,
  address: u8,
  register: u8,
  buffer: &mut [u8],
) -> Result<(), AppError> {
  i2c.write_read(address, &[register], buffer, I2C_TIMEOUT)
    .map_err(|e| AppError::I2cError(format!(
      "Failed to read register 0x{:02x} from device at address 0x{:02x}: {:?}",
      register, address, e
    )))
}

/// Write one register.
fn write_register(
  i2c: &mut I2cDriver<'_>,
  address: u8,
  register: u8,
  value: u8,
) -> Result<(), AppError> {
  i2c.write(address, &[register, value], I2C_TIMEOUT)
    .map_err(|e| AppError::I2cError(format!(
      "Failed to write 0x{:02x} to register 0x{:02x} of device at address 0x{:02x}: {:?}",
      value, register, address, e
    )))
}

/// BME280 factory trimming values.
#[derive(Debug, Default)]
struct Calibration {
  t1: f64,
  t2: f64,
  t3: f64,
  p: [f64; 9],
  h1: f64,
  h2: f64,
  h3: f64,
  h4: f64,
  h5: f64,
  h6: f64,
}

/// Compensated BME280 values.
struct Climate {
  temperature: f32,
  humidity: f32,
  pressure: f32,
  altitude: f32,
}

/// BME280 temperature, humidity and pressure sensor.
pub struct Bme280<'a> {
  /// The I2C driver.
  i2c: Rc<RefCell<I2cDriver<'a>>>,

  /// Trimming values read at start-up.
  calibration: Calibration,
}

/// The BME280 implementation.
impl<'a> Bme280<'a> {
  /// Check the chip, read its trimming values and start normal mode.
  ///
  /// # Parameters
  /// - `i2c`: The I2C driver.
  ///
  /// # Returns
  /// The BME280 sensor.
  pub fn new(i2c: Rc<RefCell<I2cDriver<'a>>>) -> Result<Self, AppError> {
    let calibration = {
      let mut bus = i2c.borrow_mut();

      let mut id = [0u8; 1];
      read_registers(&mut bus, BME280_ADDRESS, BME280_REG_CHIP_ID, &mut id)?;
      if id[0] != BME280_CHIP_ID {
        return Err(AppError::SensorError(format!(
          "BME280 did not respond at address 0x{:02x} (chip id 0x{:02x}). Please check wiring",
          BME280_ADDRESS, id[0]
        )));
      }

      let calibration = Self::read_calibration(&mut bus)?;

      // ctrl_hum only takes effect after a write to ctrl_meas.
      write_register(&mut bus, BME280_ADDRESS, BME280_REG_CTRL_HUM, BME280_OVERSAMPLE)?;
      write_register(
        &mut bus,
        BME280_ADDRESS,
        BME280_REG_CONFIG,
        (BME280_STANDBY << 5) | (BME280_FILTER << 2),
      )?;
      write_register(
        &mut bus,
        BME280_ADDRESS,
        BME280_REG_CTRL_MEAS,
        (BME280_OVERSAMPLE << 5) | (BME280_OVERSAMPLE << 2) | BME280_MODE_NORMAL,
      )?;

      calibration
    };

    log::info!("- BME280 ... OK!");

    Ok(Self { i2c, calibration })
  }

  /// Read the trimming registers.
  fn read_calibration(bus: &mut I2cDriver<'a>) -> Result<Calibration, AppError> {
    let mut tp = [0u8; 24];
    read_registers(bus, BME280_ADDRESS, BME280_REG_CALIB_TP, &mut tp)?;

    let mut h1 = [0u8; 1];
    read_registers(bus, BME280_ADDRESS, BME280_REG_CALIB_H1, &mut h1)?;

    let mut h = [0u8; 7];
    read_registers(bus, BME280_ADDRESS, BME280_REG_CALIB_H2, &mut h)?;

    let unsigned = |i: usize| u16::from_le_bytes([tp[i], tp[i + 1]]) as f64;
    let signed = |i: usize| i16::from_le_bytes([tp[i], tp[i + 1]]) as f64;

    let mut p = [0f64; 9];
    p[0] = unsigned(6);
    for (k, value) in p.iter_mut().enumerate().skip(1) {
      *value = signed(6 + 2 * k);
    }

    Ok(Calibration {
      t1: unsigned(0),
      t2: signed(2),
      t3: signed(4),
      p,
      h1: h1[0] as f64,
      h2: i16::from_le_bytes([h[0], h[1]]) as f64,
      h3: h[2] as f64,
      h4: (((h[3] as i8 as i16) << 4) | (h[4] & 0x0f) as i16) as f64,
      h5: (((h[5] as i8 as i16) << 4) | (h[4] >> 4) as i16) as f64,
      h6: h[6] as i8 as f64,
    })
  }

  /// Read and compensate one measurement.
  fn read(&mut self) -> Result<Climate, AppError> {
    let mut raw = [0u8; 8];
    read_registers(&mut self.i2c.borrow_mut(), BME280_ADDRESS, BME280_REG_DATA, &mut raw)?;

    let adc_p = ((raw[0] as u32) << 12 | (raw[1] as u32) << 4 | (raw[2] as u32) >> 4) as f64;
    let adc_t = ((raw[3] as u32) << 12 | (raw[4] as u32) << 4 | (raw[5] as u32) >> 4) as f64;
    let adc_h = ((raw[6] as u32) << 8 | raw[7] as u32) as f64;

    Ok(self.calibration.compensate(adc_t, adc_p, adc_h))
  }
}

impl Calibration {
  /// Datasheet floating point compensation formulas.
  fn compensate(&self, adc_t: f64, adc_p: f64, adc_h: f64) -> Climate {
    let var1 = (adc_t / 16384.0 - self.t1 / 1024.0) * self.t2;
    let var2 = (adc_t / 131072.0 - self.t1 / 8192.0).powi(2) * self.t3;
    let t_fine = var1 + var2;
    let temperature = t_fine / 5120.0;

    let p = &self.p;
    let mut var1 = t_fine / 2.0 - 64000.0;
    let mut var2 = var1 * var1 * p[5] / 32768.0;
    var2 += var1 * p[4] * 2.0;
    var2 = var2 / 4.0 + p[3] * 65536.0;
    var1 = (p[2] * var1 * var1 / 524288.0 + p[1] * var1) / 524288.0;
    var1 = (1.0 + var1 / 32768.0) * p[0];
    let pressure = if var1 == 0.0 {
      0.0
    } else {
      let mut pressure = 1048576.0 - adc_p;
      pressure = (pressure - var2 / 4096.0) * 6250.0 / var1;
      let var1 = p[8] * pressure * pressure / 2147483648.0;
      let var2 = pressure * p[7] / 32768.0;
      pressure + (var1 + var2 + p[6]) / 16.0
    };

    let h = t_fine - 76800.0;
    let h = (adc_h - (self.h4 * 64.0 + self.h5 / 16384.0 * h))
      * (self.h2 / 65536.0 * (1.0 + self.h6 / 67108864.0 * h * (1.0 + self.h3 / 67108864.0 * h)));
    let humidity = (h * (1.0 - self.h1 * h / 524288.0)).clamp(0.0, 100.0);

    let altitude = 44330.0 * (1.0 - (pressure / SEA_LEVEL_PA).powf(1.0 / 5.255));

    Climate {
      temperature: temperature as f32,
      humidity: humidity as f32,
      pressure: pressure as f32,
      altitude: altitude as f32,
    }
  }
}

/// MPU6050 accelerometer and gyroscope.
#[cfg(feature = "motion")]
pub struct Mpu6050<'a> {
  /// The I2C driver.
  i2c: Rc<RefCell<I2cDriver<'a>>>,
}

/// The MPU6050 implementation.
#[cfg(feature = "motion")]
impl<'a> Mpu6050<'a> {
  /// Check the chip, wake it up and set its ranges.
  ///
  /// # Parameters
  /// - `i2c`: The I2C driver.
  ///
  /// # Returns
  /// The MPU6050 sensor.
  pub fn new(i2c: Rc<RefCell<I2cDriver<'a>>>) -> Result<Self, AppError> {
    {
      let mut bus = i2c.borrow_mut();

      let mut id = [0u8; 1];
      read_registers(&mut bus, MPU6050_ADDRESS, MPU6050_REG_WHO_AM_I, &mut id)?;
      if id[0] & 0x7e != MPU6050_ADDRESS & 0x7e {
        return Err(AppError::SensorError(format!(
          "MPU6050 did not respond at address 0x{:02x} (who am i 0x{:02x}). Please check wiring",
          MPU6050_ADDRESS, id[0]
        )));
      }

      write_register(&mut bus, MPU6050_ADDRESS, MPU6050_REG_PWR_MGMT_1, MPU6050_CLOCK_PLL_XGYRO)?;
      write_register(&mut bus, MPU6050_ADDRESS, MPU6050_REG_ACCEL_CONFIG, MPU6050_ACCEL_FS_16)?;
      write_register(&mut bus, MPU6050_ADDRESS, MPU6050_REG_GYRO_CONFIG, MPU6050_GYRO_FS_2000)?;
    }

    log::info!("- MPU6050 ... OK!");

    Ok(Self { i2c })
  }

  /// Read raw accelerometer and gyroscope counts.
  fn read(&mut self) -> Result<Motion, AppError> {
    // ACCEL_XYZ(6) + TEMP(2) + GYRO_XYZ(6), big-endian.
    let mut raw = [0u8; 14];
    read_registers(&mut self.i2c.borrow_mut(), MPU6050_ADDRESS, MPU6050_REG_ACCEL_XOUT_H, &mut raw)?;

    let word = |i: usize| i16::from_be_bytes([raw[i], raw[i + 1]]);

    Ok(Motion {
      accel_x: word(0),
      accel_y: word(2),
      accel_z: word(4),
      gyro_x: word(8),
      gyro_y: word(10),
      gyro_z: word(12),
    })
  }
}

/// Supply rail monitor on an ADC pin.
pub struct SupplyMonitor<'a> {
  /// The ADC channel.
  channel: AdcChannelDriver<'a, Gpio0, AdcDriver<'a, ADC1>>,
}

/// The supply monitor implementation.
impl<'a> SupplyMonitor<'a> {
  /// Create a new supply monitor.
  ///
  /// # Parameters
  /// - `adc`: The ADC1 peripheral.
  /// - `pin`: The pin wired to the supply divider.
  ///
  /// # Returns
  /// The supply monitor.
  pub fn new(adc: ADC1, pin: Gpio0) -> Result<Self, AppError> {
    let driver = AdcDriver::new(adc)
      .map_err(|e| AppError::PeripheralsError(format!("Failed to initialize ADC: {:?}", e)))?;

    let config = AdcChannelConfig {
      attenuation: DB_11,
      ..Default::default()
    };

    let channel = AdcChannelDriver::new(driver, pin, &config)
      .map_err(|e| AppError::PeripheralsError(format!("Failed to initialize ADC channel: {:?}", e)))?;

    Ok(Self { channel })
  }

  /// Supply voltage in volts.
  fn read(&mut self) -> Result<f32, AppError> {
    let millivolts = self.channel.read()
      .map_err(|e| AppError::SensorError(format!("Failed to read supply voltage: {:?}", e)))?;

    Ok(0.001 * millivolts as f32 * SUPPLY_DIVIDER)
  }
}

/// Every sensor on the board, behind the core `Sensor` trait.
pub struct BoardSensors<'a> {
  /// Climate sensor.
  bme280: Bme280<'a>,

  /// Motion sensor.
  #[cfg(feature = "motion")]
  mpu6050: Mpu6050<'a>,

  /// Supply voltage.
  supply: SupplyMonitor<'a>,

  /// Last good values, reused when a read fails.
  last: Reading,
}

/// The board sensors implementation.
impl<'a> BoardSensors<'a> {
  /// Bring up every sensor on the shared bus.
  ///
  /// # Parameters
  /// - `i2c`: The I2C driver.
  /// - `supply`: The supply monitor.
  ///
  /// # Returns
  /// The board sensors, or an error when a chip does not respond.
  pub fn new(i2c: Rc<RefCell<I2cDriver<'a>>>, supply: SupplyMonitor<'a>) -> Result<Self, AppError> {
    log::info!("- Setting up BME280 sensor");
    let bme280 = Bme280::new(Rc::clone(&i2c))?;

    #[cfg(feature = "motion")]
    let mpu6050 = {
      log::info!("- Setting up MPU6050 sensor");
      Mpu6050::new(Rc::clone(&i2c))?
    };

    Ok(Self {
      bme280,
      #[cfg(feature = "motion")]
      mpu6050,
      supply,
      last: Reading::default(),
    })
  }
}

/// Implement the core `Sensor` trait for `BoardSensors`.
impl Sensor for BoardSensors<'_> {
  /// Take one reading. Values that fail to read keep their previous value.
  fn read(&mut self) -> Reading {
    match self.supply.read() {
      Ok(volts) => self.last.supply_voltage = volts,
      Err(e) => warn!("{}", e),
    }

    match self.bme280.read() {
      Ok(climate) => {
        self.last.temperature = climate.temperature;
        self.last.humidity = climate.humidity;
        self.last.pressure = climate.pressure;
        self.last.altitude = climate.altitude;
      }
      Err(e) => warn!("{}", e),
    }

    #[cfg(feature = "motion")]
    match self.mpu6050.read() {
      Ok(motion) => self.last.motion = motion,
      Err(e) => warn!("{}", e),
    }

    self.last
  }
}
