//! Log writer module
//!
//! Thread-safe log writing to files or stdout/stderr.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

/// Global log writer instance
static LOG_WRITER: OnceLock<LogWriter> = OnceLock::new();

/// Log output target
enum LogTarget {
    Stdout,
    Stderr,
    File(Mutex<File>),
}

impl LogTarget {
    fn open(path: Option<&str>, fallback: Self) -> io::Result<Self> {
        match path {
            Some(path) => Ok(Self::File(Mutex::new(open_log_file(path)?))),
            None => Ok(fallback),
        }
    }

    fn write(&self, message: &str) {
        match self {
            Self::Stdout => println!("{message}"),
            Self::Stderr => eprintln!("{message}"),
            Self::File(file) => {
                if let Ok(mut f) = file.lock() {
                    let _ = writeln!(f, "{message}");
                }
            }
        }
    }
}

/// Thread-safe log writer
pub struct LogWriter {
    /// Access and info lines
    access: LogTarget,
    /// Errors and warnings
    error: LogTarget,
}

impl LogWriter {
    fn new(access_log_file: Option<&str>, error_log_file: Option<&str>) -> io::Result<Self> {
        Ok(Self {
            access: LogTarget::open(access_log_file, LogTarget::Stdout)?,
            error: LogTarget::open(error_log_file, LogTarget::Stderr)?,
        })
    }

    pub fn write_access(&self, message: &str) {
        self.access.write(message);
    }

    pub fn write_error(&self, message: &str) {
        self.error.write(message);
    }

    /// Info lines share the access log target
    pub fn write_info(&self, message: &str) {
        self.access.write(message);
    }
}

/// Open or create a log file for appending
fn open_log_file(path: &str) -> io::Result<File> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    OpenOptions::new().create(true).append(true).open(path)
}

/// Initialize the global log writer
///
/// This should be called once at application startup.
/// Returns error if log files cannot be opened.
pub fn init(access_log_file: Option<&str>, error_log_file: Option<&str>) -> io::Result<()> {
    let writer = LogWriter::new(access_log_file, error_log_file)?;
    LOG_WRITER.set(writer).map_err(|_| {
        io::Error::new(
            io::ErrorKind::AlreadyExists,
            "Log writer already initialized",
        )
    })
}

/// Get the global log writer
///
/// Panics if `init()` has not been called.
pub fn get() -> &'static LogWriter {
    LOG_WRITER
        .get()
        .expect("Log writer not initialized. Call logger::writer::init() first.")
}

/// Check if the log writer has been initialized
pub fn is_initialized() -> bool {
    LOG_WRITER.get().is_some()
}
