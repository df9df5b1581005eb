use crate::error::AppError;
use esp_idf_svc::hal::delay::NON_BLOCK;
use esp_idf_svc::hal::gpio::{AnyIOPin, InputPin, OutputPin};
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::uart::{config::Config, Uart, UartDriver};
use esp_idf_svc::hal::units::Hertz;
use std::io;

/// Console baud rate.
const BAUD_RATE: u32 = 115_200;

/// Serial line carrying the command console.
pub struct SerialConsole<'a> {
  /// The UART driver.
  uart: UartDriver<'a>,
}

/// The serial console implementation.
impl<'a> SerialConsole<'a> {
  /// Create a new serial console.
  ///
  /// # Parameters
  /// - `uart`: The UART peripheral.
  /// - `tx`: The transmit pin.
  /// - `rx`: The receive pin.
  ///
  /// # Returns
  /// The serial console.
  pub fn new<U: Uart>(
    uart: impl Peripheral<P = U> + 'a,
    tx: impl Peripheral<P = impl OutputPin> + 'a,
    rx: impl Peripheral<P = impl InputPin> + 'a,
  ) -> Result<Self, AppError> {
    let config = Config::default().baudrate(Hertz(BAUD_RATE));

    let uart = UartDriver::new(
      uart,
      tx,
      rx,
      Option::<AnyIOPin>::None,
      Option::<AnyIOPin>::None,
      &config,
    )
    .map_err(|e| AppError::ConsoleError(format!("Failed to initialize UART: {:?}", e)))?;

    Ok(Self { uart })
  }

  /// Read whatever has arrived, without waiting.
  ///
  /// # Parameters
  /// - `buffer`: Where to store the bytes.
  ///
  /// # Returns
  /// The number of bytes read.
  pub fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize, AppError> {
    self.uart.read(buffer, NON_BLOCK)
      .map_err(|e| AppError::ConsoleError(format!("Failed to read from UART: {:?}", e)))
  }
}

/// Implement `io::Write` so the console can write replies to the line.
impl io::Write for SerialConsole<'_> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.uart.write(buf).map_err(io::Error::other)
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}
