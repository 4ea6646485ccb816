//! Host-side interface wiring
//!
//! The plugin never touches network namespaces itself; a veth controller creates the
//! pair, moves one end into the container and configures its address.

use crate::error::PluginError;
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default path of the veth helper.
pub const VETHCTL: &str = "/usr/bin/vethctl";

/// Controller kind configured by `veth_ctrl_type`.
pub const SHELL_CONTROLLER: &str = "shell";

/// Creates and configures the container interface.
#[async_trait::async_trait]
pub trait VethController: Send + Sync {
    /// Wire container `container_id` with `address` and default gateway `gateway`.
    async fn wire(&self, container_id: &str, address: Ipv4Net, gateway: Ipv4Addr) -> Result<(), PluginError>;
}

/// Veth controller that runs an external helper binary.
#[derive(Debug, Clone)]
pub struct ShellVethController {
    program: String,
}

impl Default for ShellVethController {
    fn default() -> Self {
        Self::with_program(VETHCTL)
    }
}

impl ShellVethController {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    async fn run(&self, args: &[String]) -> Result<(), String> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| format!("failed to execute {}: {}", self.program, e))?;
        if output.status.success() {
            return Ok(());
        }
        Err(format!(
            "{} {} exited with {}: {}",
            self.program,
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }

    /// Run once, and a second time if the first attempt fails.
    async fn run_with_retry(&self, args: &[String]) -> Result<(), PluginError> {
        debug!("{} {}", self.program, args.join(" "));
        if let Err(first) = self.run(args).await {
            warn!("{}; retrying", first);
            self.run(args).await.map_err(PluginError::Veth)?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl VethController for ShellVethController {
    async fn wire(&self, container_id: &str, address: Ipv4Net, gateway: Ipv4Addr) -> Result<(), PluginError> {
        self.run_with_retry(&["create".to_string(), container_id.to_string()])
            .await?;
        self.run_with_retry(&[
            "setnetns".to_string(),
            format!("{}@{}", address, gateway),
            container_id.to_string(),
        ])
        .await?;
        info!("Wired container {} with {} via {}", container_id, address, gateway);
        Ok(())
    }
}

/// Controller for a `veth_ctrl_type` value.
pub fn controller_for(kind: &str) -> Result<Box<dyn VethController>, PluginError> {
    match kind.trim() {
        "" | SHELL_CONTROLLER => Ok(Box::new(ShellVethController::default())),
        other => Err(PluginError::Config(format!("unsupported veth_ctrl_type {:?}", other))),
    }
}
