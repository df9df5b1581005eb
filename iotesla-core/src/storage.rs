use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::rc::Rc;

/// Filesystem usage snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    /// Size of the filesystem in bytes.
    pub total_bytes: u64,

    /// Bytes in use.
    pub used_bytes: u64,
}

impl Usage {
    pub fn free_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }
}

/// Backing store for the single log file.
///
/// The append log is the only user of an implementation, so it owns it.
pub trait Storage {
    /// Handle to the log file.
    type File: Read + Write;

    /// Open the log file for appending, creating it if missing. Reads start
    /// at the beginning of the file.
    fn open_append(&mut self) -> io::Result<Self::File>;

    /// Open the log file for reading from position zero.
    fn open_read(&mut self) -> io::Result<Self::File>;

    /// Delete the log file. Deleting a missing file succeeds.
    fn remove(&mut self) -> io::Result<()>;

    /// Length of the log file in bytes, 0 when it does not exist.
    fn file_len(&self) -> io::Result<u64>;

    /// Cut the log file down to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Report filesystem usage.
    fn usage(&self) -> io::Result<Usage>;
}

/// Shared state of a [`MemStorage`] and its open handles.
#[derive(Debug, Default)]
struct MemState {
    data: Option<Vec<u8>>,
    capacity: u64,
    overhead: u64,
    max_write: Option<usize>,
    unavailable: bool,
    truncate_fails: bool,
}

impl MemState {
    fn check_available(&self) -> io::Result<()> {
        if self.unavailable {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "storage unavailable"));
        }

        Ok(())
    }
}

/// RAM-backed storage with fault injection.
///
/// Clones share the same file, so a test can keep one clone to inspect or
/// break the storage after handing another to an append log.
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    state: Rc<RefCell<MemState>>,
}

impl MemStorage {
    /// Create an empty storage of `capacity` bytes.
    pub fn with_capacity(capacity: u64) -> Self {
        let storage = Self::default();
        storage.state.borrow_mut().capacity = capacity;
        storage
    }

    /// Count `bytes` as used regardless of the file size.
    pub fn set_overhead(&self, bytes: u64) {
        self.state.borrow_mut().overhead = bytes;
    }

    /// Cap every write call at `bytes`, or lift the cap with `None`.
    pub fn set_max_write(&self, bytes: Option<usize>) {
        self.state.borrow_mut().max_write = bytes;
    }

    /// Make every operation fail as if the device was gone.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.borrow_mut().unavailable = unavailable;
    }

    /// Make [`Storage::truncate`] fail.
    pub fn set_truncate_fails(&self, fails: bool) {
        self.state.borrow_mut().truncate_fails = fails;
    }

    /// Current file contents, `None` when the file does not exist.
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.state.borrow().data.clone()
    }

    /// Replace the file contents.
    pub fn set_contents(&self, bytes: &[u8]) {
        self.state.borrow_mut().data = Some(bytes.to_vec());
    }
}

impl Storage for MemStorage {
    type File = MemFile;

    fn open_append(&mut self) -> io::Result<MemFile> {
        let mut state = self.state.borrow_mut();
        state.check_available()?;
        state.data.get_or_insert_with(Vec::new);

        Ok(MemFile {
            state: Rc::clone(&self.state),
            position: 0,
            writable: true,
        })
    }

    fn open_read(&mut self) -> io::Result<MemFile> {
        let state = self.state.borrow();
        state.check_available()?;
        if state.data.is_none() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "log file does not exist"));
        }

        Ok(MemFile {
            state: Rc::clone(&self.state),
            position: 0,
            writable: false,
        })
    }

    fn remove(&mut self) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_available()?;
        state.data = None;
        Ok(())
    }

    fn file_len(&self) -> io::Result<u64> {
        let state = self.state.borrow();
        state.check_available()?;
        Ok(state.data.as_ref().map_or(0, |d| d.len() as u64))
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_available()?;
        if state.truncate_fails {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "truncate not supported"));
        }
        if let Some(data) = state.data.as_mut() {
            data.truncate(len as usize);
        }
        Ok(())
    }

    fn usage(&self) -> io::Result<Usage> {
        let state = self.state.borrow();
        state.check_available()?;
        let file_len = state.data.as_ref().map_or(0, |d| d.len() as u64);

        Ok(Usage {
            total_bytes: state.capacity,
            used_bytes: state.overhead + file_len,
        })
    }
}

/// Open handle on a [`MemStorage`] file.
#[derive(Debug)]
pub struct MemFile {
    state: Rc<RefCell<MemState>>,
    position: usize,
    writable: bool,
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.state.borrow();
        state.check_available()?;
        let Some(data) = state.data.as_ref() else {
            return Ok(0);
        };

        let start = self.position.min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.position = start + n;

        Ok(n)
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "file opened read-only"));
        }

        let mut state = self.state.borrow_mut();
        state.check_available()?;

        let used = state.overhead + state.data.as_ref().map_or(0, |d| d.len() as u64);
        let room = state.capacity.saturating_sub(used) as usize;
        let n = buf.len().min(room).min(state.max_write.unwrap_or(usize::MAX));

        // A handle to a deleted file writes nowhere.
        if let Some(data) = state.data.as_mut() {
            data.extend_from_slice(&buf[..n]);
        }

        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.borrow().check_available()
    }
}
