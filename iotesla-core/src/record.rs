/// Size of the fields shared by every record layout, in bytes.
const BASE_SIZE: usize = 4 + 4 + 5 * 4;

/// Size of the motion block, in bytes.
#[cfg(feature = "motion")]
const MOTION_SIZE: usize = 6 * 2;

/// Size of one encoded record, in bytes.
#[cfg(feature = "motion")]
pub const RECORD_SIZE: usize = BASE_SIZE + MOTION_SIZE;

/// Size of one encoded record, in bytes.
#[cfg(not(feature = "motion"))]
pub const RECORD_SIZE: usize = BASE_SIZE;

/// Column names, in encoding order.
#[cfg(feature = "motion")]
pub const FIELD_NAMES: &[&str] = &[
    "timestamp",
    "data_id",
    "supply_vcc",
    "temperature",
    "humidity",
    "pressure",
    "altitude",
    "accelerometer_x",
    "accelerometer_y",
    "accelerometer_z",
    "gyroscope_x",
    "gyroscope_y",
    "gyroscope_z",
];

/// Column names, in encoding order.
#[cfg(not(feature = "motion"))]
pub const FIELD_NAMES: &[&str] = &[
    "timestamp",
    "data_id",
    "supply_vcc",
    "temperature",
    "humidity",
    "pressure",
    "altitude",
];

/// Raw MPU6050 counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Motion {
    pub accel_x: i16,
    pub accel_y: i16,
    pub accel_z: i16,
    pub gyro_x: i16,
    pub gyro_y: i16,
    pub gyro_z: i16,
}

/// One set of sensor values, before it is stamped into a [`Record`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reading {
    /// Supply voltage in volts.
    pub supply_voltage: f32,

    /// Temperature in degrees Celsius.
    pub temperature: f32,

    /// Relative humidity in percent.
    pub humidity: f32,

    /// Pressure in pascal.
    pub pressure: f32,

    /// Altitude in meters.
    pub altitude: f32,

    /// Accelerometer and gyroscope counts.
    #[cfg(feature = "motion")]
    pub motion: Motion,
}

/// One stored sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Record {
    /// Device uptime in milliseconds when the sample was taken.
    pub timestamp: u32,

    /// Per-sample counter, for display only.
    pub sequence_id: u32,

    /// Sensor values.
    pub reading: Reading,
}

/// Record codec error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Input is not exactly one record long.
    InvalidLength { expected: usize, actual: usize },
}

/// Implementation of the `Display` trait for `RecordError`.
impl core::fmt::Display for RecordError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RecordError::InvalidLength { expected, actual } => {
                write!(
                    f,
                    "Corrupt record: expected {expected} bytes, got {actual}"
                )
            }
        }
    }
}

/// Implementation of the `Error` trait for `RecordError`.
impl std::error::Error for RecordError {}

/// Little-endian field writer over a fixed buffer.
struct Encoder {
    buffer: [u8; RECORD_SIZE],
    offset: usize,
}

impl Encoder {
    fn put(&mut self, bytes: &[u8]) {
        self.buffer[self.offset..self.offset + bytes.len()].copy_from_slice(bytes);
        self.offset += bytes.len();
    }
}

/// Little-endian field reader over a slice already checked to be one record.
struct Decoder<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl Decoder<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.offset..self.offset + N]);
        self.offset += N;
        out
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }

    #[cfg(feature = "motion")]
    fn i16(&mut self) -> i16 {
        i16::from_le_bytes(self.take())
    }
}

impl Record {
    /// Encode the record into its on-flash image.
    ///
    /// Fields are written in declaration order, little-endian, with no
    /// padding.
    ///
    /// # Returns
    /// * `[u8; RECORD_SIZE]` - The encoded record.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut enc = Encoder {
            buffer: [0u8; RECORD_SIZE],
            offset: 0,
        };
        let r = &self.reading;

        enc.put(&self.timestamp.to_le_bytes());
        enc.put(&self.sequence_id.to_le_bytes());
        enc.put(&r.supply_voltage.to_le_bytes());
        enc.put(&r.temperature.to_le_bytes());
        enc.put(&r.humidity.to_le_bytes());
        enc.put(&r.pressure.to_le_bytes());
        enc.put(&r.altitude.to_le_bytes());

        #[cfg(feature = "motion")]
        {
            let m = &r.motion;
            for value in [m.accel_x, m.accel_y, m.accel_z, m.gyro_x, m.gyro_y, m.gyro_z] {
                enc.put(&value.to_le_bytes());
            }
        }

        enc.buffer
    }

    /// Decode one record from its on-flash image.
    ///
    /// # Arguments
    /// * `bytes` - Exactly [`RECORD_SIZE`] bytes.
    ///
    /// # Returns
    /// * `Result<Record, RecordError>` - The decoded record or an error.
    pub fn decode(bytes: &[u8]) -> Result<Record, RecordError> {
        if bytes.len() != RECORD_SIZE {
            return Err(RecordError::InvalidLength {
                expected: RECORD_SIZE,
                actual: bytes.len(),
            });
        }

        let mut dec = Decoder { bytes, offset: 0 };

        let timestamp = dec.u32();
        let sequence_id = dec.u32();
        let reading = Reading {
            supply_voltage: dec.f32(),
            temperature: dec.f32(),
            humidity: dec.f32(),
            pressure: dec.f32(),
            altitude: dec.f32(),
            #[cfg(feature = "motion")]
            motion: Motion {
                accel_x: dec.i16(),
                accel_y: dec.i16(),
                accel_z: dec.i16(),
                gyro_x: dec.i16(),
                gyro_y: dec.i16(),
                gyro_z: dec.i16(),
            },
        };

        Ok(Record {
            timestamp,
            sequence_id,
            reading,
        })
    }
}

/// Tests.
#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record {
            timestamp: 0x0102_0304,
            sequence_id: 7,
            reading: Reading {
                supply_voltage: 3.3,
                temperature: -12.5,
                humidity: 48.25,
                pressure: 101_325.0,
                altitude: 12.75,
                #[cfg(feature = "motion")]
                motion: Motion {
                    accel_x: -1,
                    accel_y: 2048,
                    accel_z: i16::MIN,
                    gyro_x: i16::MAX,
                    gyro_y: 0,
                    gyro_z: -300,
                },
            },
        }
    }

    #[test]
    fn record_size_matches_layout() {
        #[cfg(feature = "motion")]
        assert_eq!(RECORD_SIZE, 40);
        #[cfg(not(feature = "motion"))]
        assert_eq!(RECORD_SIZE, 28);

        assert_eq!(FIELD_NAMES.len(), if cfg!(feature = "motion") { 13 } else { 7 });
    }

    #[test]
    fn encoding_is_little_endian_in_field_order() {
        let bytes = sample().encode();

        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..8], &7u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3.3f32.to_le_bytes());
        assert_eq!(&bytes[24..28], &12.75f32.to_le_bytes());

        #[cfg(feature = "motion")]
        {
            assert_eq!(&bytes[28..30], &(-1i16).to_le_bytes());
            assert_eq!(&bytes[38..40], &(-300i16).to_le_bytes());
        }
    }

    #[test]
    fn decode_restores_encoded_record() {
        let record = sample();
        assert_eq!(Record::decode(&record.encode()), Ok(record));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let bytes = sample().encode();

        assert_eq!(
            Record::decode(&bytes[..RECORD_SIZE - 1]),
            Err(RecordError::InvalidLength {
                expected: RECORD_SIZE,
                actual: RECORD_SIZE - 1,
            })
        );

        assert_eq!(
            Record::decode(&[]),
            Err(RecordError::InvalidLength {
                expected: RECORD_SIZE,
                actual: 0,
            })
        );

        let mut long = bytes.to_vec();
        long.push(0);
        assert!(Record::decode(&long).is_err());
    }

    #[test]
    fn decode_error_display_message() {
        let msg = RecordError::InvalidLength {
            expected: 40,
            actual: 3,
        }
        .to_string();
        assert_eq!(msg, "Corrupt record: expected 40 bytes, got 3");
    }
}
