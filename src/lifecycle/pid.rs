//! Pid file of a running server.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Location of the pid file, if one is configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PidFile {
    path: Option<PathBuf>,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// No pid file: background detection always reports absence.
    pub fn none() -> Self {
        Self { path: None }
    }

    pub fn from_option(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Recorded pid; missing or unparsable files read as `None`.
    pub fn read(&self) -> Option<i32> {
        let path = self.path.as_ref()?;
        let content = fs::read_to_string(path).ok()?;
        match content.trim().parse::<i32>() {
            Ok(pid) if pid > 0 => Some(pid),
            _ => {
                tracing::debug!(path = %path.display(), "Pid file does not hold a valid pid");
                None
            }
        }
    }

    pub fn write(&self, pid: u32) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, format!("{}\n", pid))
    }

    pub fn remove(&self) -> io::Result<()> {
        match &self.path {
            Some(path) => match fs::remove_file(path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
            None => Ok(()),
        }
    }
}
