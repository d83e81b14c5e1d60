// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the signalling relay.
#[derive(Debug, Clone, clap::Parser)]
pub struct RelayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "RELAY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8888, env = "RELAY_PORT")]
    pub port: u16,

    /// JSON `peerConnectionOptions` blob (ICE servers etc.) sent to
    /// every player in the initial `config` message.
    #[arg(long, env = "RELAY_RTC_CONFIG")]
    pub rtc_config: Option<String>,
}

impl RelayConfig {
    /// Parse the configured peer-connection options, defaulting to an
    /// empty object when none were provided.
    pub fn peer_connection_options(&self) -> anyhow::Result<serde_json::Value> {
        match self.rtc_config {
            Some(ref raw) => {
                let value: serde_json::Value = serde_json::from_str(raw)?;
                Ok(value)
            }
            None => Ok(serde_json::json!({})),
        }
    }
}
