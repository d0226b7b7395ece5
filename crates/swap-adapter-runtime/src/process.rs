//! Process management for locally served models

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::ProcessConfig;
use crate::health::HealthCheck;
use crate::{Result, RuntimeError};

/// Owns one serving process from spawn to termination
pub struct ProcessManager {
    config: ProcessConfig,
    child: Option<Child>,
    start_time: Option<Instant>,
}

/// Process status
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    NotStarted,
    Running,
    Exited(Option<i32>),
}

impl ProcessManager {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            child: None,
            start_time: None,
        }
    }

    /// Spawn the process and wait until `health` reports it ready
    pub async fn start(&mut self, health: &HealthCheck) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        info!("Starting process: {} {:?}", self.config.command, self.config.args);

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if let Some(working_dir) = &self.config.working_dir {
            command.current_dir(working_dir);
        }

        let child = command
            .spawn()
            .map_err(|e| RuntimeError::Process(format!("Failed to spawn {}: {}", self.config.command, e)))?;

        debug!("Spawned pid {:?}", child.id());
        self.child = Some(child);
        self.start_time = Some(Instant::now());

        let deadline = self.config.startup_timeout;
        let ready = health.wait_until_healthy(deadline, || self.is_running()).await;

        match ready {
            Ok(()) => {
                info!(
                    "Process {} ready after {:?}",
                    self.config.command,
                    self.uptime().unwrap_or_default()
                );
                Ok(())
            }
            Err(e) => {
                error!("Process startup failed: {}", e);
                self.stop().await?;
                Err(e)
            }
        }
    }

    /// SIGTERM, wait for the grace period, then kill
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        info!("Stopping process {}", self.config.command);

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("Failed to send SIGTERM: {}", e);
            } else {
                debug!("Sent SIGTERM to {}", pid);
            }
        }

        match timeout(self.config.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!("Process exited gracefully: {}", status);
            }
            Ok(Err(e)) => {
                error!("Error waiting for process: {}", e);
            }
            Err(_) => {
                warn!("Graceful shutdown timed out, forcing kill");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill process: {}", e);
                }
            }
        }

        self.start_time = None;
        Ok(())
    }

    /// Check if the process is running, reaping it if it exited
    pub fn is_running(&mut self) -> bool {
        match &mut self.child {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    warn!("Process {} exited: {}", self.config.command, status);
                    false
                }
                Err(_) => false,
            },
            None => false,
        }
    }

    pub fn status(&mut self) -> ProcessStatus {
        match &mut self.child {
            None => ProcessStatus::NotStarted,
            Some(child) => match child.try_wait() {
                Ok(None) => ProcessStatus::Running,
                Ok(Some(status)) => ProcessStatus::Exited(status.code()),
                Err(_) => ProcessStatus::Exited(None),
            },
        }
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.start_time.map(|start| start.elapsed())
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            warn!("ProcessManager dropped with running process, killing it");
            if let Err(e) = child.start_kill() {
                error!("Failed to kill process during cleanup: {}", e);
            }
        }
    }
}
