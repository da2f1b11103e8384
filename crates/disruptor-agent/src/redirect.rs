//! Traffic redirection from the target port to the proxy.
//!
//! Uses an iptables REDIRECT rule in the nat PREROUTING chain, which only
//! affects traffic arriving at the interface; the proxy's own upstream
//! connections to localhost are not redirected.

use anyhow::{bail, Context};
use tokio::process::Command;
use tracing::debug;

/// Installs and removes the iptables rule moving inbound traffic from the
/// target port to the proxy port.
pub struct TrafficRedirector {
    iface: String,
    target_port: u16,
    proxy_port: u16,
}

impl TrafficRedirector {
    /// Create a redirector for the given interface and port pair.
    pub fn new(iface: impl Into<String>, target_port: u16, proxy_port: u16) -> Self {
        Self {
            iface: iface.into(),
            target_port,
            proxy_port,
        }
    }

    /// Install the redirection rule.
    pub async fn install(&self) -> anyhow::Result<()> {
        self.run_iptables("-A").await
    }

    /// Remove the redirection rule.
    pub async fn remove(&self) -> anyhow::Result<()> {
        self.run_iptables("-D").await
    }

    fn rule_args(&self, action: &str) -> Vec<String> {
        vec![
            "-t".to_string(),
            "nat".to_string(),
            action.to_string(),
            "PREROUTING".to_string(),
            "-i".to_string(),
            self.iface.clone(),
            "-p".to_string(),
            "tcp".to_string(),
            "--dport".to_string(),
            self.target_port.to_string(),
            "-j".to_string(),
            "REDIRECT".to_string(),
            "--to-port".to_string(),
            self.proxy_port.to_string(),
        ]
    }

    async fn run_iptables(&self, action: &str) -> anyhow::Result<()> {
        let args = self.rule_args(action);
        debug!(args = ?args, "running iptables");

        let output = Command::new("iptables")
            .args(&args)
            .output()
            .await
            .context("failed to run iptables")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("iptables {} failed: {}", action, stderr.trim());
        }

        Ok(())
    }
}
