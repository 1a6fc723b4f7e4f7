use crate::{
    config::ExcavatorConfig,
    error::{ExcavatorError, Result},
};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// A running excavator executable
pub struct ExcavatorProcess {
    child: Child,
    port: u16,
}

impl ExcavatorProcess {
    /// Spawn excavator with its API bound to `config.api_host:port`.
    ///
    /// The child is killed when this value is dropped.
    pub fn spawn(config: &ExcavatorConfig, port: u16) -> Result<Self> {
        let mut cmd = Command::new(&config.executable);
        cmd.arg("-i")
            .arg(&config.api_host)
            .arg("-p")
            .arg(port.to_string())
            .args(&config.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        debug!("Spawning {:?}", cmd);

        let child = cmd.spawn().map_err(|e| {
            ExcavatorError::Spawn(format!("{}: {}", config.executable.display(), e))
        })?;

        info!(
            "Started excavator (pid {:?}) with API on port {}",
            child.id(),
            port
        );

        Ok(Self { child, port })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Exit status if the process has already exited
    pub fn try_exit_status(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Kill the process and reap it
    pub async fn kill(&mut self) -> Result<()> {
        if let Err(e) = self.child.kill().await {
            // Already reaped
            if self.child.try_wait()?.is_none() {
                warn!("Failed to kill excavator on port {}: {}", self.port, e);
                return Err(e.into());
            }
        }
        Ok(())
    }
}
