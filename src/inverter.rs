//! Inverter command driver.
//!
//! Sends the coarse mode/target command over authenticated HTTP. Transport
//! and authentication failures are surfaced to the control loop as errors;
//! the loop keeps running either way.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::InverterConfig;

/// Semantic command payload understood by the inverter endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InverterCommand {
    pub mode: CommandMode,
    pub soc_min_percent: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMode {
    Manual,
    Auto,
}

pub struct InverterClient {
    base_url: String,
    user: String,
    password: String,
    client: reqwest::Client,
}

impl InverterClient {
    /// Build from config; `None` when the driver is disabled.
    pub fn from_config(cfg: &InverterConfig) -> Result<Option<Self>> {
        if !cfg.enabled {
            return Ok(None);
        }
        let host = cfg
            .host
            .as_deref()
            .context("inverter enabled without host")?;
        let user = cfg
            .user
            .as_deref()
            .context("inverter enabled without user")?;
        let password = cfg
            .password
            .as_deref()
            .context("inverter enabled without password")?;

        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{host}")
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_s))
            .danger_accept_invalid_certs(!cfg.verify_tls)
            .user_agent(concat!("chargepilot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Some(Self {
            base_url,
            user: user.to_string(),
            password: password.to_string(),
            client,
        }))
    }

    pub async fn send_command(&self, command: &InverterCommand) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/battery/command", self.base_url))
            .basic_auth(&self.user, Some(&self.password))
            .json(command)
            .send()
            .await
            .context("inverter command request failed")?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            anyhow::bail!("inverter authentication failed (HTTP {status}); check credentials");
        }
        if !status.is_success() {
            anyhow::bail!("inverter rejected command: HTTP {status}");
        }
        Ok(())
    }
}
