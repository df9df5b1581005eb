use crate::gate::{Admission, CapacityGate, GateState, LatchReason};
use crate::record::{Record, RECORD_SIZE};
use crate::storage::{Storage, Usage};
use log::{debug, info, warn};
use std::io::{self, Read, Write};

/// Append log error.
#[derive(Debug)]
pub enum LogError {
    /// The storage could not be reached or failed an operation.
    Io(io::Error),
}

/// Implementation of the `Display` trait for `LogError`.
impl core::fmt::Display for LogError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LogError::Io(e) => write!(f, "Storage I/O error: {e}"),
        }
    }
}

/// Implementation of the `Error` trait for `LogError`.
impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LogError::Io(e) => Some(e),
        }
    }
}

impl From<io::Error> for LogError {
    fn from(error: io::Error) -> Self {
        LogError::Io(error)
    }
}

/// Result of a successful [`AppendLog::append`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendStatus {
    /// The record is on storage.
    Stored,

    /// The gate is latched; nothing was written.
    Full(LatchReason),
}

/// Append-only log of fixed-size records in a single file.
pub struct AppendLog<S: Storage> {
    /// The backing store.
    storage: S,

    /// Append handle, opened on first use.
    file: Option<S::File>,

    /// Capacity latch.
    gate: CapacityGate,
}

impl<S: Storage> AppendLog<S> {
    /// Create a log on top of `storage`. Nothing is opened yet.
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            file: None,
            gate: CapacityGate::new(),
        }
    }

    /// Append one record.
    ///
    /// # Arguments
    /// * `record` - The record to store.
    ///
    /// # Returns
    /// * `Ok(AppendStatus::Stored)` - The whole record was written.
    /// * `Ok(AppendStatus::Full(_))` - The gate is latched, or latched during
    ///   this call.
    /// * `Err(LogError)` - The storage failed. The gate is left as it was.
    pub fn append(&mut self, record: &Record) -> Result<AppendStatus, LogError> {
        if let GateState::Latched(reason) = self.gate.state() {
            return Ok(AppendStatus::Full(reason));
        }

        if self.file.is_none() {
            self.open()?;

            if let GateState::Latched(reason) = self.gate.state() {
                return Ok(AppendStatus::Full(reason));
            }
        }

        let usage = self.storage.usage()?;
        let free_bytes = usage.free_bytes();
        if let Admission::Reject = self.gate.check(RECORD_SIZE as u64, free_bytes) {
            return Ok(AppendStatus::Full(LatchReason::CapacityExhausted));
        }

        let Some(file) = self.file.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "log file not open").into());
        };

        let bytes = record.encode();
        let written = file.write(&bytes)?;
        file.flush()?;

        if written != RECORD_SIZE {
            warn!(
                "Short write on record {}: {} of {} bytes",
                record.sequence_id, written, RECORD_SIZE
            );
            self.gate.latch(LatchReason::WriteSizeMismatch);
            return Ok(AppendStatus::Full(LatchReason::WriteSizeMismatch));
        }

        debug!(
            "Writing data {:016} ts: {} ms, {} bytes (free: {} bytes)",
            record.sequence_id, record.timestamp, RECORD_SIZE, free_bytes
        );

        Ok(AppendStatus::Stored)
    }

    /// Open the append handle, first cutting off a partial record left at
    /// the end of the file by an interrupted write.
    ///
    /// When the file cannot be truncated the gate is latched instead, so no
    /// record is ever written behind a torn one.
    fn open(&mut self) -> Result<(), LogError> {
        let len = self.storage.file_len()?;
        let torn = len % RECORD_SIZE as u64;
        if torn != 0 {
            let keep = len - torn;
            warn!("Log file ends in a partial record, truncating {len} bytes to {keep}");
            if let Err(e) = self.storage.truncate(keep) {
                warn!("Failed to truncate log file: {e}");
                self.gate.latch(LatchReason::WriteSizeMismatch);
            }
        }

        self.file = Some(self.storage.open_append()?);
        info!("Opened log file");

        Ok(())
    }

    /// Iterate over every stored record from the start of the file.
    ///
    /// The append handle is closed while the iterator lives and reopened when
    /// it is dropped. A trailing partial record is skipped. A log that was
    /// never written yields nothing.
    ///
    /// # Returns
    /// * `Result<Records<'_, S>, LogError>` - The record iterator or an error.
    pub fn records(&mut self) -> Result<Records<'_, S>, LogError> {
        self.file = None;

        let reader = match self.storage.open_read() {
            Ok(reader) => Some(reader),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Records { log: self, reader })
    }

    /// Close the file, delete it and open the gate again.
    pub fn reset(&mut self) -> Result<(), LogError> {
        self.file = None;
        self.storage.remove()?;
        self.gate.reset();
        info!("Deleted log file");

        Ok(())
    }

    /// Drop the append handle. The gate is left as it is.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            info!("Closed log file");
        }
    }

    /// Filesystem usage snapshot.
    pub fn usage(&self) -> Result<Usage, LogError> {
        Ok(self.storage.usage()?)
    }

    /// Current latch state.
    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    /// Whether an append handle is open.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

/// Lazy iterator over the stored records, see [`AppendLog::records`].
pub struct Records<'a, S: Storage> {
    log: &'a mut AppendLog<S>,
    reader: Option<S::File>,
}

impl<S: Storage> Records<'_, S> {
    /// Fill `buffer` as far as the file allows. Returns the byte count.
    fn fill(reader: &mut S::File, buffer: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buffer.len() {
            match reader.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(filled)
    }
}

impl<S: Storage> Iterator for Records<'_, S> {
    type Item = Result<Record, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        let mut buffer = [0u8; RECORD_SIZE];

        let filled = match Self::fill(reader, &mut buffer) {
            Ok(filled) => filled,
            Err(e) => {
                self.reader = None;
                return Some(Err(e.into()));
            }
        };

        if filled < RECORD_SIZE {
            if filled > 0 {
                debug!("Dropping {filled} trailing bytes of a partial record");
            }
            self.reader = None;
            return None;
        }

        match Record::decode(&buffer) {
            Ok(record) => Some(Ok(record)),
            Err(_) => {
                self.reader = None;
                None
            }
        }
    }
}

impl<S: Storage> Drop for Records<'_, S> {
    /// Put the log back in append mode.
    fn drop(&mut self) {
        self.reader = None;

        if self.log.file.is_none() && !self.log.gate.is_latched() {
            if let Err(e) = self.log.open() {
                warn!("Failed to reopen log file for appending: {e}");
            }
        }
    }
}
