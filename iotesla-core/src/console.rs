//! Line-oriented command console.
//!
//! Bytes arrive from a serial line, are echoed back and collected into a
//! short line buffer. A completed line is matched against a fixed command
//! table: `print` dumps the log as semicolon-separated text, `delete` erases
//! it and `status` shows the last sample and the free space.

use crate::append_log::{AppendLog, LogError};
use crate::gate::GateState;
use crate::record::{Record, FIELD_NAMES};
use crate::storage::Storage;
use log::{info, warn};
use std::io::{self, Write};

/// Longest accepted command line, in bytes.
pub const MAX_LINE_LEN: usize = 15;

/// Separator between columns of the `print` output.
const FIELD_SEPARATOR: &str = ";";

/// Console command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Dump every stored record.
    Print,

    /// Delete the log and clear the full latch.
    Delete,

    /// Show the last sample and storage usage.
    Status,
}

/// Command table, in the order it is listed to the operator.
const COMMANDS: [(&str, Command); 3] = [
    ("print", Command::Print),
    ("delete", Command::Delete),
    ("status", Command::Status),
];

impl Command {
    /// Look up a command by its exact, case-sensitive name.
    pub fn parse(line: &[u8]) -> Option<Command> {
        COMMANDS
            .iter()
            .find(|(name, _)| name.as_bytes() == line)
            .map(|&(_, command)| command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Print => "print",
            Command::Delete => "delete",
            Command::Status => "status",
        }
    }
}

impl core::fmt::Display for Command {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Console error.
#[derive(Debug)]
pub enum ConsoleError {
    /// Writing to the console transport failed.
    Output(io::Error),

    /// The log could not be read or deleted.
    Log(LogError),
}

/// Implementation of the `Display` trait for `ConsoleError`.
impl core::fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConsoleError::Output(e) => write!(f, "Console output error: {e}"),
            ConsoleError::Log(e) => write!(f, "{e}"),
        }
    }
}

/// Implementation of the `Error` trait for `ConsoleError`.
impl std::error::Error for ConsoleError {}

impl From<io::Error> for ConsoleError {
    fn from(error: io::Error) -> Self {
        ConsoleError::Output(error)
    }
}

impl From<LogError> for ConsoleError {
    fn from(error: LogError) -> Self {
        ConsoleError::Log(error)
    }
}

/// Line buffer and parser state.
#[derive(Debug, Default)]
pub struct Console {
    /// Bytes of the line being typed.
    line: heapless::Vec<u8, MAX_LINE_LEN>,

    /// Set after an overflow; the rest of the line is thrown away.
    discarding: bool,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes collected so far.
    pub fn buffered(&self) -> &[u8] {
        &self.line
    }

    /// Feed one input byte.
    ///
    /// # Arguments
    /// * `byte` - The received byte. `\r` counts as `\n`.
    /// * `out` - Console output, for echo and notices.
    ///
    /// # Returns
    /// * `io::Result<Option<Command>>` - The command completed by this byte,
    ///   if any.
    pub fn feed<W: Write>(&mut self, byte: u8, out: &mut W) -> io::Result<Option<Command>> {
        let byte = if byte == b'\r' { b'\n' } else { byte };

        if byte == b'\n' {
            out.write_all(b"\n")?;

            if core::mem::take(&mut self.discarding) || self.line.is_empty() {
                self.line.clear();
                return Ok(None);
            }

            let command = Command::parse(&self.line);
            self.line.clear();

            if command.is_none() {
                write_unknown(out)?;
            }

            return Ok(command);
        }

        if self.discarding {
            return Ok(None);
        }

        if self.line.push(byte).is_err() {
            self.line.clear();
            self.discarding = true;
            writeln!(out, "\nCommand too long (max {MAX_LINE_LEN} characters)")?;
            return Ok(None);
        }

        out.write_all(&[byte])?;
        Ok(None)
    }

    /// Drain `input` and run every command it completes.
    ///
    /// A failing command is reported on the console and the remaining input
    /// is still processed. Only output failures end the call early.
    ///
    /// # Returns
    /// * `Result<usize, ConsoleError>` - Number of commands run.
    pub fn poll<S: Storage, W: Write>(
        &mut self,
        input: &[u8],
        out: &mut W,
        log: &mut AppendLog<S>,
        last_sample: Option<&Record>,
    ) -> Result<usize, ConsoleError> {
        let mut executed = 0;

        for &byte in input {
            let Some(command) = self.feed(byte, out)? else {
                continue;
            };

            info!("Console command: {command}");
            executed += 1;

            match run(command, out, log, last_sample) {
                Ok(()) => {}
                Err(ConsoleError::Log(e)) => {
                    warn!("Command '{command}' failed: {e}");
                    writeln!(out, "! {command} failed: {e}")?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(executed)
    }
}

/// Reply to a line that matches no command.
fn write_unknown<W: Write>(out: &mut W) -> io::Result<()> {
    write!(out, "Unknown command.")?;
    for (i, (name, _)) in COMMANDS.iter().enumerate() {
        let prefix = if i == 0 { " One of: " } else { ", " };
        write!(out, "{prefix}{name}")?;
    }
    writeln!(out, ".")
}

/// Run one command.
///
/// # Arguments
/// * `command` - The command to run.
/// * `out` - Console output.
/// * `log` - The record log.
/// * `last_sample` - Most recent sample, if any was taken.
///
/// # Returns
/// * `Result<(), ConsoleError>` - The result of the command.
pub fn run<S: Storage, W: Write>(
    command: Command,
    out: &mut W,
    log: &mut AppendLog<S>,
    last_sample: Option<&Record>,
) -> Result<(), ConsoleError> {
    match command {
        Command::Print => print_log(log, out),
        Command::Delete => {
            log.reset()?;
            writeln!(out, "Log deleted")?;
            Ok(())
        }
        Command::Status => print_status(log, last_sample, out),
    }
}

/// Write the header and one line per stored record.
pub fn print_log<S: Storage, W: Write>(
    log: &mut AppendLog<S>,
    out: &mut W,
) -> Result<(), ConsoleError> {
    writeln!(out, "{}", FIELD_NAMES.join(FIELD_SEPARATOR))?;

    for record in log.records()? {
        write_row(out, &record?)?;
    }

    Ok(())
}

/// Write one record as a `print` data line.
pub fn write_row<W: Write>(out: &mut W, record: &Record) -> io::Result<()> {
    let s = FIELD_SEPARATOR;
    let r = &record.reading;

    write!(
        out,
        "{}{s}{}{s}{:.4}{s}{:.4}{s}{:.4}{s}{:.4}{s}{:.4}",
        record.timestamp,
        record.sequence_id,
        r.supply_voltage,
        r.temperature,
        r.humidity,
        r.pressure,
        r.altitude,
    )?;

    #[cfg(feature = "motion")]
    {
        let m = &r.motion;
        write!(
            out,
            "{s}{}{s}{}{s}{}{s}{}{s}{}{s}{}",
            m.accel_x, m.accel_y, m.accel_z, m.gyro_x, m.gyro_y, m.gyro_z,
        )?;
    }

    writeln!(out)
}

/// Write the human-readable sample summary.
pub fn write_sample<W: Write>(out: &mut W, record: &Record) -> io::Result<()> {
    let r = &record.reading;

    writeln!(
        out,
        "{:.2} [V] {:.2} [C] {:.2} [%] {:.2} [Pa] {:.2} [m]",
        r.supply_voltage, r.temperature, r.humidity, r.pressure, r.altitude
    )?;

    #[cfg(feature = "motion")]
    {
        let m = &r.motion;
        writeln!(
            out,
            "{} [ax] {} [ay] {} [az] {} [gx] {} [gy] {} [gz]",
            m.accel_x, m.accel_y, m.accel_z, m.gyro_x, m.gyro_y, m.gyro_z
        )?;
    }

    Ok(())
}

/// Write the `status` report.
pub fn print_status<S: Storage, W: Write>(
    log: &AppendLog<S>,
    last_sample: Option<&Record>,
    out: &mut W,
) -> Result<(), ConsoleError> {
    match last_sample {
        Some(record) => {
            writeln!(
                out,
                "Sample {:016} at {} ms",
                record.sequence_id, record.timestamp
            )?;
            write_sample(out, record)?;
        }
        None => writeln!(out, "No sample taken yet")?,
    }

    match log.usage() {
        Ok(usage) => writeln!(
            out,
            "Storage: {} bytes free, {} bytes used",
            usage.free_bytes(),
            usage.used_bytes
        )?,
        Err(e) => writeln!(out, "Storage: {e}")?,
    }

    if let GateState::Latched(reason) = log.gate_state() {
        writeln!(out, "Log is full ({reason}), 'delete' to resume logging")?;
    }

    Ok(())
}

/// Tests.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Reading, RECORD_SIZE};
    use crate::storage::MemStorage;

    fn feed_all(console: &mut Console, input: &[u8]) -> (Vec<Command>, String) {
        let mut out = Vec::new();
        let commands = input
            .iter()
            .filter_map(|&b| console.feed(b, &mut out).unwrap())
            .collect();
        (commands, String::from_utf8(out).unwrap())
    }

    fn record(sequence_id: u32) -> Record {
        Record {
            timestamp: 1000 + sequence_id,
            sequence_id,
            reading: Reading {
                supply_voltage: 3.25,
                temperature: 21.5,
                humidity: 40.5,
                pressure: 101325.0,
                altitude: -3.5,
                ..Reading::default()
            },
        }
    }

    fn run_poll(log: &mut AppendLog<MemStorage>, input: &[u8], last: Option<&Record>) -> String {
        let mut console = Console::new();
        let mut out = Vec::new();
        console.poll(input, &mut out, log, last).unwrap();
        assert!(console.buffered().is_empty());
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn status_line_dispatches_once() {
        let mut console = Console::new();
        let (commands, out) = feed_all(&mut console, b"status\n");

        assert_eq!(commands, vec![Command::Status]);
        assert!(console.buffered().is_empty());
        assert_eq!(out, "status\n");
    }

    #[test]
    fn carriage_return_ends_a_line() {
        let mut console = Console::new();
        let (commands, _) = feed_all(&mut console, b"print\rdelete\r\n");
        assert_eq!(commands, vec![Command::Print, Command::Delete]);
    }

    #[test]
    fn commands_are_case_sensitive() {
        let mut console = Console::new();
        let (commands, out) = feed_all(&mut console, b"PRINT\n");

        assert!(commands.is_empty());
        assert!(out.ends_with("Unknown command. One of: print, delete, status.\n"));
    }

    #[test]
    fn unknown_command_lists_the_table() {
        let mut console = Console::new();
        let (commands, out) = feed_all(&mut console, b"stat\n");
        assert!(commands.is_empty());
        assert_eq!(out, "stat\nUnknown command. One of: print, delete, status.\n");
        assert!(console.buffered().is_empty());
    }

    #[test]
    fn overlong_line_overflows_once() {
        let mut console = Console::new();
        let (commands, out) = feed_all(&mut console, &[b'a'; 20]);

        assert!(commands.is_empty());
        assert_eq!(out.matches("Command too long").count(), 1);
        assert!(out.contains("max 15 characters"));
        assert!(console.buffered().is_empty());

        // The tail of the long line is not taken as a command.
        let (commands, out) = feed_all(&mut console, b"status\nstatus\n");
        assert_eq!(commands, vec![Command::Status]);
        assert!(!out.contains("Unknown command"));
    }

    #[test]
    fn overflow_discards_until_newline() {
        let mut console = Console::new();
        let mut input = vec![b'x'; 16];
        input.extend_from_slice(b"status\nstatus\n");

        let (commands, _) = feed_all(&mut console, &input);
        assert_eq!(commands, vec![Command::Status]);
    }

    #[test]
    fn fifteen_characters_fit() {
        let mut console = Console::new();
        let (_, out) = feed_all(&mut console, &[b'z'; MAX_LINE_LEN]);
        assert_eq!(console.buffered().len(), MAX_LINE_LEN);
        assert!(!out.contains("too long"));
    }

    #[test]
    fn blank_lines_are_ignored() {
        let mut console = Console::new();
        let (commands, out) = feed_all(&mut console, b"\r\n\n");
        assert!(commands.is_empty());
        assert_eq!(out, "\n\n\n");
        assert!(console.buffered().is_empty());
    }

    #[test]
    fn empty_line_runs_no_command() {
        let mut log = AppendLog::new(MemStorage::with_capacity(1000));
        let mut console = Console::new();
        let mut out = Vec::new();

        assert_eq!(console.poll(b"\n", &mut out, &mut log, None).unwrap(), 0);
        assert_eq!(out, b"\n");

        // The next line is still parsed normally.
        assert_eq!(console.poll(b"status\n", &mut out, &mut log, None).unwrap(), 1);
    }

    #[test]
    fn print_empty_log_writes_header_only() {
        let mut log = AppendLog::new(MemStorage::with_capacity(1024));
        let out = run_poll(&mut log, b"print\n", None);

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "print");
        assert!(lines[1].starts_with("timestamp;data_id;supply_vcc;temperature;humidity;pressure;altitude"));
        #[cfg(feature = "motion")]
        assert!(lines[1].ends_with(
            "accelerometer_x;accelerometer_y;accelerometer_z;gyroscope_x;gyroscope_y;gyroscope_z"
        ));
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn print_writes_one_line_per_record() {
        let mut log = AppendLog::new(MemStorage::with_capacity(1024));
        log.append(&record(1)).unwrap();
        log.append(&record(2)).unwrap();

        let out = run_poll(&mut log, b"print\n", None);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);

        let expected = "1001;1;3.2500;21.5000;40.5000;101325.0000;-3.5000";
        assert!(lines[2].starts_with(expected));
        #[cfg(feature = "motion")]
        assert_eq!(lines[2], format!("{expected};0;0;0;0;0;0"));
        assert!(lines[3].starts_with("1002;2;"));

        // Still appending afterwards.
        assert!(log.is_open());
        log.append(&record(3)).unwrap();
        assert_eq!(log.records().unwrap().count(), 3);
    }

    #[test]
    fn delete_clears_log_and_latch() {
        let mut log = AppendLog::new(MemStorage::with_capacity(RECORD_SIZE as u64 + 1));
        log.append(&record(1)).unwrap();
        log.append(&record(2)).unwrap();
        assert!(log.gate_state() != GateState::Open);

        let out = run_poll(&mut log, b"delete\n", None);
        assert!(out.contains("Log deleted"));
        assert_eq!(log.gate_state(), GateState::Open);
        assert_eq!(log.records().unwrap().count(), 0);
    }

    #[test]
    fn status_reports_sample_and_usage() {
        let mut log = AppendLog::new(MemStorage::with_capacity(1000));
        let sample = record(42);
        log.append(&sample).unwrap();

        let out = run_poll(&mut log, b"status\n", Some(&sample));
        assert!(out.contains("Sample 0000000000000042 at 1042 ms"));
        assert!(out.contains("3.25 [V] 21.50 [C] 40.50 [%] 101325.00 [Pa] -3.50 [m]"));
        assert!(out.contains(&format!(
            "Storage: {} bytes free, {} bytes used",
            1000 - RECORD_SIZE,
            RECORD_SIZE
        )));
        assert!(!out.contains("Log is full"));
    }

    #[test]
    fn status_without_sample_mentions_full_log() {
        let mut log = AppendLog::new(MemStorage::with_capacity(0));
        log.append(&record(1)).unwrap();

        let out = run_poll(&mut log, b"status\n", None);
        assert!(out.contains("No sample taken yet"));
        assert!(out.contains("Log is full (capacity exhausted)"));
    }

    #[test]
    fn status_names_short_write_latch() {
        let storage = MemStorage::with_capacity(1000);
        let mut log = AppendLog::new(storage.clone());
        storage.set_max_write(Some(RECORD_SIZE / 2));
        log.append(&record(1)).unwrap();

        let out = run_poll(&mut log, b"status\n", None);
        assert!(out.contains("Log is full (short write), 'delete' to resume logging"));
        assert!(!out.contains("capacity exhausted"));
    }

    #[test]
    fn failing_command_is_reported_and_input_continues() {
        let storage = MemStorage::with_capacity(1000);
        let mut log = AppendLog::new(storage.clone());
        storage.set_unavailable(true);

        let mut console = Console::new();
        let mut out = Vec::new();
        let executed = console
            .poll(b"delete\nstatus\n", &mut out, &mut log, None)
            .unwrap();
        let out = String::from_utf8(out).unwrap();

        assert_eq!(executed, 2);
        assert!(out.contains("! delete failed"));
        assert!(out.contains("No sample taken yet"));
    }

    #[test]
    fn poll_keeps_partial_line_between_calls() {
        let mut log = AppendLog::new(MemStorage::with_capacity(1000));
        let mut console = Console::new();
        let mut out = Vec::new();

        assert_eq!(console.poll(b"sta", &mut out, &mut log, None).unwrap(), 0);
        assert_eq!(console.buffered(), b"sta");
        assert_eq!(console.poll(b"tus\n", &mut out, &mut log, None).unwrap(), 1);
    }
}
