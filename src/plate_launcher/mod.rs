//! PlateLauncher - External Recogniser Process
//!
//! ## Responsibilities
//!
//! - Validate the configured recogniser executable
//! - Skip launching when a process with the same name is already running
//! - Start it detached and record the outcome for the status API

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use sysinfo::System;
use tokio::process::Command;
use tokio::sync::RwLock;

/// Launch outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum LaunchStatus {
    /// No executable configured or launching disabled
    Disabled,
    /// Configured path does not exist
    Invalid { path: String },
    AlreadyRunning { process_name: String },
    Started { pid: Option<u32> },
    Failed { message: String },
}

impl LaunchStatus {
    /// Recogniser believed to be up
    pub fn is_running(&self) -> bool {
        matches!(self, Self::AlreadyRunning { .. } | Self::Started { .. })
    }
}

/// PlateLauncher instance
pub struct PlateLauncher {
    executable: Option<PathBuf>,
    status: RwLock<LaunchStatus>,
}

impl PlateLauncher {
    /// `executable` empty or `None` disables the launcher
    pub fn new(executable: Option<&str>) -> Self {
        let executable = executable
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        Self {
            executable,
            status: RwLock::new(LaunchStatus::Disabled),
        }
    }

    pub async fn status(&self) -> LaunchStatus {
        self.status.read().await.clone()
    }

    /// Launch the recogniser unless it is already running
    pub async fn launch(&self) -> LaunchStatus {
        let status = match &self.executable {
            None => LaunchStatus::Disabled,
            Some(path) => launch_executable(path).await,
        };

        match &status {
            LaunchStatus::Disabled => tracing::debug!("Plate recogniser launcher disabled"),
            LaunchStatus::Invalid { path } => {
                tracing::warn!(path = %path, "Plate recogniser executable not found")
            }
            LaunchStatus::AlreadyRunning { process_name } => {
                tracing::info!(process_name = %process_name, "Plate recogniser already running")
            }
            LaunchStatus::Started { pid } => {
                tracing::info!(pid = ?pid, "Plate recogniser started")
            }
            LaunchStatus::Failed { message } => {
                tracing::error!(error = %message, "Plate recogniser failed to start")
            }
        }

        *self.status.write().await = status.clone();
        status
    }
}

async fn launch_executable(path: &Path) -> LaunchStatus {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return LaunchStatus::Invalid {
            path: path.display().to_string(),
        };
    }

    let Some(process_name) = process_name(path) else {
        return LaunchStatus::Invalid {
            path: path.display().to_string(),
        };
    };

    let lookup = process_name.clone();
    let running = tokio::task::spawn_blocking(move || is_process_running(&lookup))
        .await
        .unwrap_or(false);
    if running {
        return LaunchStatus::AlreadyRunning { process_name };
    }

    let mut command = Command::new(path);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        command.current_dir(dir);
    }
    match command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => LaunchStatus::Started { pid: child.id() },
        Err(e) => LaunchStatus::Failed {
            message: e.to_string(),
        },
    }
}

/// File name without extension, as the OS reports running processes
pub fn process_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}

/// Any running process whose name (extension stripped) matches, case-insensitive
pub fn is_process_running(process_name: &str) -> bool {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.processes().values().any(|process| {
        let name = process.name();
        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name);
        stem.eq_ignore_ascii_case(process_name)
    })
}
