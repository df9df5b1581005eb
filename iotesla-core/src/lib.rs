//! Hardware-free core of the IoTesla data logger.
//!
//! Samples are stamped into fixed-size [`Record`]s and appended to a single
//! log file through [`AppendLog`], which stops writing for good once the
//! storage runs out of room (see [`CapacityGate`]) until the log is deleted.
//! A small serial [`Console`] reads the log back, deletes it and reports
//! status. [`Client`] ties both together behind one polling step.

pub mod append_log;
pub mod client;
pub mod console;
pub mod gate;
pub mod record;
pub mod sampler;
pub mod storage;

pub use append_log::{AppendLog, AppendStatus, LogError, Records};
pub use client::{Client, ClientConfig, Connection, Tick};
pub use console::{Command, Console, ConsoleError};
pub use gate::{CapacityGate, GateState, LatchReason};
pub use record::{Motion, Reading, Record, RecordError, RECORD_SIZE};
pub use sampler::{Sampler, Sensor};
pub use storage::{MemStorage, Storage, Usage};
