use crate::append_log::{AppendLog, AppendStatus, LogError};
use crate::console::{self, Console, ConsoleError};
use crate::record::Record;
use crate::sampler::{Sampler, Sensor};
use crate::storage::Storage;
use log::{error, info};
use std::io::Write;

/// Default sample period in milliseconds.
pub const DEFAULT_SAMPLE_PERIOD_MS: u32 = 10;

/// Terminal escape that clears the screen and homes the cursor.
const CLEAR_SCREEN: &[u8] = b"\x1b[2J\x1b[H";

/// Client settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Minimum time between samples, in milliseconds.
    pub sample_period_ms: u32,

    /// Redraw every new sample on the console.
    pub echo_samples: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: DEFAULT_SAMPLE_PERIOD_MS,
            echo_samples: false,
        }
    }
}

/// Session state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Connection {
    #[default]
    Disconnected,
    Connected,
}

/// What one scheduler tick did.
#[derive(Debug)]
pub enum Tick {
    /// Not connected; nothing was sampled.
    Disconnected,

    /// The sample period has not elapsed yet.
    Idle,

    /// A sample was taken and handed to the log.
    Sampled { record: Record, status: AppendStatus },

    /// A sample was taken but the storage failed.
    StorageFailed { record: Record, error: LogError },
}

/// The data logger: sampler, record log and console behind one polling step.
pub struct Client<S: Storage, D: Sensor> {
    config: ClientConfig,
    log: AppendLog<S>,
    sensor: D,
    sampler: Sampler,
    console: Console,
    connection: Connection,

    /// Most recent sample, published by the sample loop.
    last_sample: Option<Record>,
}

impl<S: Storage, D: Sensor> Client<S, D> {
    /// Create a disconnected client.
    ///
    /// # Arguments
    /// * `config` - Client settings.
    /// * `storage` - Backing store for the log file.
    /// * `sensor` - Source of readings.
    ///
    /// # Returns
    /// The client.
    pub fn new(config: ClientConfig, storage: S, sensor: D) -> Self {
        Self {
            config,
            log: AppendLog::new(storage),
            sensor,
            sampler: Sampler::new(config.sample_period_ms),
            console: Console::new(),
            connection: Connection::Disconnected,
            last_sample: None,
        }
    }

    /// Start sampling. An open session is closed first.
    pub fn connect(&mut self) {
        if self.is_connected() {
            self.close();
        }

        self.connection = Connection::Connected;
        info!("Client connected");
    }

    /// Stop sampling.
    ///
    /// # Returns
    /// * `bool` - `false` when the client was not connected.
    pub fn disconnect(&mut self) -> bool {
        if !self.is_connected() {
            return false;
        }

        self.close();
        info!("Client disconnected");
        true
    }

    pub fn is_connected(&self) -> bool {
        self.connection == Connection::Connected
    }

    pub fn connection(&self) -> Connection {
        self.connection
    }

    fn close(&mut self) {
        self.log.close();
        self.connection = Connection::Disconnected;
    }

    /// Run the sample loop once.
    ///
    /// When the period has elapsed, a reading is taken, stamped, published
    /// as the last sample and appended. A full log does not stop sampling.
    ///
    /// # Arguments
    /// * `now_ms` - Current uptime in milliseconds.
    ///
    /// # Returns
    /// * `Tick` - What happened.
    pub fn step(&mut self, now_ms: u32) -> Tick {
        if !self.is_connected() {
            return Tick::Disconnected;
        }

        if !self.sampler.due(now_ms) {
            return Tick::Idle;
        }

        let record = self.sampler.sample(now_ms, &mut self.sensor);
        self.last_sample = Some(record);

        match self.log.append(&record) {
            Ok(status) => Tick::Sampled { record, status },
            Err(error) => {
                error!("Failed to store record {}: {}", record.sequence_id, error);
                Tick::StorageFailed { record, error }
            }
        }
    }

    /// Run one scheduler tick: the sample loop, then the console.
    ///
    /// # Arguments
    /// * `now_ms` - Current uptime in milliseconds.
    /// * `input` - Console bytes received since the last tick.
    /// * `out` - Console output.
    ///
    /// # Returns
    /// * `Result<Tick, ConsoleError>` - What the sample loop did, or a console
    ///   output failure.
    pub fn poll<W: Write>(
        &mut self,
        now_ms: u32,
        input: &[u8],
        out: &mut W,
    ) -> Result<Tick, ConsoleError> {
        let tick = self.step(now_ms);

        if self.config.echo_samples {
            if let Tick::Sampled { record, .. } | Tick::StorageFailed { record, .. } = &tick {
                out.write_all(CLEAR_SCREEN)?;
                console::write_sample(out, record)?;
            }
        }

        self.console
            .poll(input, out, &mut self.log, self.last_sample.as_ref())?;

        Ok(tick)
    }

    pub fn last_sample(&self) -> Option<&Record> {
        self.last_sample.as_ref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn log(&self) -> &AppendLog<S> {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut AppendLog<S> {
        &mut self.log
    }
}

/// Tests.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{GateState, LatchReason};
    use crate::record::{Reading, RECORD_SIZE};
    use crate::storage::MemStorage;

    fn reading() -> Reading {
        Reading {
            supply_voltage: 3.3,
            temperature: 22.0,
            ..Reading::default()
        }
    }

    type TestClient = Client<MemStorage, fn() -> Reading>;

    fn client(capacity: u64, config: ClientConfig) -> (TestClient, MemStorage) {
        let storage = MemStorage::with_capacity(capacity);
        let client = Client::new(config, storage.clone(), reading as fn() -> Reading);
        (client, storage)
    }

    fn stored(client: &mut TestClient) -> Vec<Record> {
        client
            .log_mut()
            .records()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn disconnected_client_does_not_sample() {
        let (mut client, storage) = client(1024, ClientConfig::default());

        assert!(matches!(client.step(1000), Tick::Disconnected));
        assert!(client.last_sample().is_none());
        assert_eq!(storage.contents(), None);
    }

    #[test]
    fn connect_and_disconnect_transitions() {
        let (mut client, _) = client(1024, ClientConfig::default());
        assert!(!client.disconnect());

        client.connect();
        assert!(client.is_connected());
        assert!(matches!(client.step(11), Tick::Sampled { .. }));
        assert!(client.log().is_open());

        // Reconnecting closes the log handle first.
        client.connect();
        assert!(client.is_connected());
        assert!(!client.log().is_open());

        assert!(client.disconnect());
        assert_eq!(client.connection(), Connection::Disconnected);
        assert!(!client.disconnect());
        assert!(matches!(client.step(100), Tick::Disconnected));
    }

    #[test]
    fn samples_once_per_period() {
        let (mut client, _) = client(1024, ClientConfig::default());
        client.connect();

        let mut sampled = 0;
        for now in 0..=100 {
            if let Tick::Sampled { status, .. } = client.step(now) {
                assert_eq!(status, AppendStatus::Stored);
                sampled += 1;
            }
        }

        // Fires at 11, 22, ..., 99.
        assert_eq!(sampled, 9);
        let records = stored(&mut client);
        assert_eq!(records.len(), 9);
        assert_eq!(records[0].timestamp, 11);
        assert_eq!(records[0].sequence_id, 1);
        assert_eq!(records[8].sequence_id, 9);
        assert_eq!(client.last_sample(), records.last());
    }

    #[test]
    fn sampling_continues_when_full() {
        // Room for three and a half records.
        let capacity = 3 * RECORD_SIZE as u64 + RECORD_SIZE as u64 / 2;
        let (mut client, _) = client(capacity, ClientConfig::default());
        client.connect();

        let statuses: Vec<AppendStatus> = (1..=5)
            .map(|i| match client.step(i * 11) {
                Tick::Sampled { status, .. } => status,
                other => panic!("unexpected tick {other:?}"),
            })
            .collect();

        assert_eq!(statuses[..3], [AppendStatus::Stored; 3]);
        assert_eq!(
            statuses[3..],
            [AppendStatus::Full(LatchReason::CapacityExhausted); 2]
        );
        assert_eq!(client.last_sample().map(|r| r.sequence_id), Some(5));
        assert_eq!(stored(&mut client).len(), 3);
    }

    #[test]
    fn storage_failure_is_reported_not_latched() {
        let (mut client, storage) = client(1024, ClientConfig::default());
        client.connect();
        storage.set_unavailable(true);

        assert!(matches!(client.step(11), Tick::StorageFailed { .. }));
        assert_eq!(client.log().gate_state(), GateState::Open);
        assert_eq!(client.last_sample().map(|r| r.sequence_id), Some(1));

        storage.set_unavailable(false);
        assert!(matches!(
            client.step(22),
            Tick::Sampled {
                status: AppendStatus::Stored,
                ..
            }
        ));
    }

    #[test]
    fn poll_runs_sampler_then_console() {
        let (mut client, _) = client(1024, ClientConfig::default());
        client.connect();

        let mut out = Vec::new();
        let tick = client.poll(11, b"status\n", &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(matches!(tick, Tick::Sampled { .. }));
        // The sample taken in this tick is visible to the command.
        assert!(out.contains("Sample 0000000000000001 at 11 ms"));
        assert!(out.contains("3.30 [V] 22.00 [C]"));
    }

    #[test]
    fn console_works_while_disconnected() {
        let (mut client, _) = client(1024, ClientConfig::default());

        let mut out = Vec::new();
        let tick = client.poll(11, b"print\n", &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(matches!(tick, Tick::Disconnected));
        assert!(out.contains("timestamp;data_id;"));
    }

    #[test]
    fn delete_from_console_resumes_logging() {
        let (mut client, _) = client(RECORD_SIZE as u64 + 1, ClientConfig::default());
        client.connect();

        let mut out = Vec::new();
        client.poll(11, b"", &mut out).unwrap();
        assert!(matches!(
            client.poll(22, b"", &mut out).unwrap(),
            Tick::Sampled {
                status: AppendStatus::Full(_),
                ..
            }
        ));

        client.poll(23, b"delete\n", &mut out).unwrap();
        assert!(matches!(
            client.poll(34, b"", &mut out).unwrap(),
            Tick::Sampled {
                status: AppendStatus::Stored,
                ..
            }
        ));
        assert_eq!(stored(&mut client).len(), 1);
    }

    #[test]
    fn echo_redraws_each_sample() {
        let config = ClientConfig {
            echo_samples: true,
            ..ClientConfig::default()
        };
        let (mut client, _) = client(1024, config);
        client.connect();

        let mut out = Vec::new();
        client.poll(5, b"", &mut out).unwrap();
        assert!(out.is_empty());

        client.poll(11, b"", &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("\x1b[2J\x1b[H3.30 [V]"));
    }
}
