use crate::error::AppError;
use esp_idf_svc::sys::{esp, esp_spiffs_info, esp_vfs_spiffs_conf_t, esp_vfs_spiffs_register};
use iotesla_core::{Storage, Usage};
use log::info;
use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;

/// Maximum number of files open at once on the partition.
const MAX_OPEN_FILES: usize = 4;

/// Log file on a SPIFFS partition mounted into the VFS.
pub struct SpiffsStorage {
  /// Partition label, for usage queries.
  label: CString,

  /// Full path of the log file.
  path: PathBuf,
}

/// The SPIFFS storage implementation.
impl SpiffsStorage {
  /// Mount the partition and check its size.
  ///
  /// # Parameters
  /// - `label`: The partition label from `partitions.csv`.
  /// - `mount_point`: Where to mount the partition in the VFS.
  /// - `file_name`: The log file name.
  ///
  /// # Returns
  /// The storage, or `AppError::StorageError` when the partition cannot be
  /// mounted or reports no space.
  pub fn mount(label: &str, mount_point: &str, file_name: &str) -> Result<Self, AppError> {
    let c_label = CString::new(label)
      .map_err(|e| AppError::StorageError(format!("Invalid partition label: {:?}", e)))?;
    let c_mount_point = CString::new(mount_point)
      .map_err(|e| AppError::StorageError(format!("Invalid mount point: {:?}", e)))?;

    let config = esp_vfs_spiffs_conf_t {
      base_path: c_mount_point.as_ptr(),
      partition_label: c_label.as_ptr(),
      max_files: MAX_OPEN_FILES,
      format_if_mount_failed: true,
    };

    // The VFS copies both strings during registration.
    esp!(unsafe { esp_vfs_spiffs_register(&config) })
      .map_err(|e| AppError::StorageError(format!(
        "SPIFFS partition '{}' cannot be mounted at {}: {:?}",
        label, mount_point, e
      )))?;

    let storage = Self {
      label: c_label,
      path: PathBuf::from(mount_point).join(file_name),
    };

    let usage = storage.usage()
      .map_err(|e| AppError::StorageError(format!("Failed to query SPIFFS usage: {}", e)))?;

    info!("- Flash total size ..: {} bytes", usage.total_bytes);
    info!("- Flash used size ...: {} bytes", usage.used_bytes);

    if usage.total_bytes == 0 {
      return Err(AppError::StorageError(format!(
        "SPIFFS partition '{}' reports no space, check the partition table",
        label
      )));
    }

    info!("- SPIFFS ... OK! Logging to {}", storage.path.display());

    Ok(storage)
  }
}

/// Implement the `Storage` trait for `SpiffsStorage`.
impl Storage for SpiffsStorage {
  type File = File;

  fn open_append(&mut self) -> io::Result<File> {
    OpenOptions::new()
      .read(true)
      .append(true)
      .create(true)
      .open(&self.path)
  }

  fn open_read(&mut self) -> io::Result<File> {
    File::open(&self.path)
  }

  fn remove(&mut self) -> io::Result<()> {
    match fs::remove_file(&self.path) {
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      result => result,
    }
  }

  fn file_len(&self) -> io::Result<u64> {
    match fs::metadata(&self.path) {
      Ok(metadata) => Ok(metadata.len()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
      Err(e) => Err(e),
    }
  }

  fn truncate(&mut self, len: u64) -> io::Result<()> {
    OpenOptions::new()
      .write(true)
      .open(&self.path)?
      .set_len(len)
  }

  fn usage(&self) -> io::Result<Usage> {
    let mut total: usize = 0;
    let mut used: usize = 0;

    esp!(unsafe { esp_spiffs_info(self.label.as_ptr(), &mut total, &mut used) })
      .map_err(io::Error::other)?;

    Ok(Usage {
      total_bytes: total as u64,
      used_bytes: used as u64,
    })
  }
}
