//! Daemon configuration (§6 "Configuration options"): one entry per
//! recognized option, grouped by the component it tunes. Durations are
//! stored as plain integers (seconds or milliseconds, named accordingly)
//! rather than `Duration` so the TOML stays plain numbers.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::aprs_interface::APRSInterfaceConfig;
use crate::callsign::Callsign;
use crate::error::Error;
use crate::interface::InterfaceConfig;
use crate::kiss::{InitParam, KissDeviceConfig};
use crate::message_handler::RetryConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub mycall: String,
    #[serde(default)]
    pub ports: Vec<PortConfig>,
    #[serde(default)]
    pub aprs: AprsConfig,
    #[serde(default)]
    pub digipeater: Option<DigipeaterSettings>,
}

/// One KISS-over-TCP TNC connection and its C3/C5 tuning (§6: reset_on_close,
/// send_block_size/send_block_delay, cts_delay/cts_rand).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortConfig {
    /// `host:port` of the TNC's KISS-over-TCP endpoint.
    pub device: String,
    #[serde(default)]
    pub reset_on_close: bool,
    #[serde(default)]
    pub send_block_size: Option<usize>,
    #[serde(default)]
    pub send_block_delay_ms: u64,
    #[serde(default)]
    pub tnc_init: Vec<TncInitParam>,
    #[serde(default = "default_cts_delay_ms")]
    pub cts_delay_ms: u64,
    #[serde(default)]
    pub cts_rand_ms: u64,
}

fn default_cts_delay_ms() -> u64 {
    100
}

impl Default for PortConfig {
    fn default() -> Self {
        PortConfig {
            device: String::new(),
            reset_on_close: false,
            send_block_size: None,
            send_block_delay_ms: 0,
            tnc_init: Vec::new(),
            cts_delay_ms: default_cts_delay_ms(),
            cts_rand_ms: 100,
        }
    }
}

impl PortConfig {
    pub fn kiss_device_config(&self) -> KissDeviceConfig {
        KissDeviceConfig {
            cmd_mode_exit: Vec::new(),
            init_delay: Duration::from_millis(100),
            tnc_init: self.tnc_init.iter().map(TncInitParam::to_init_param).collect(),
            send_block_size: self.send_block_size,
            send_block_delay: Duration::from_millis(self.send_block_delay_ms),
            reset_on_close: self.reset_on_close,
            write_queue_depth: 64,
        }
    }

    pub fn interface_config(&self) -> InterfaceConfig {
        InterfaceConfig {
            cts_delay: Duration::from_millis(self.cts_delay_ms),
            cts_rand: Duration::from_millis(self.cts_rand_ms),
        }
    }
}

/// One `tnc_init = [{ command = "tx_delay", value = 50 }]` entry.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TncInitParam {
    pub command: TncCommandName,
    pub value: u8,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TncCommandName {
    TxDelay,
    Persist,
    SlotTime,
    TxTail,
    FullDuplex,
    SetHardware,
}

impl TncInitParam {
    fn to_init_param(&self) -> InitParam {
        let command = match self.command {
            TncCommandName::TxDelay => crate::kiss::KissCommand::TxDelay,
            TncCommandName::Persist => crate::kiss::KissCommand::Persist,
            TncCommandName::SlotTime => crate::kiss::KissCommand::SlotTime,
            TncCommandName::TxTail => crate::kiss::KissCommand::TxTail,
            TncCommandName::FullDuplex => crate::kiss::KissCommand::FullDuplex,
            TncCommandName::SetHardware => crate::kiss::KissCommand::SetHardware,
        };
        InitParam { command, value: self.value }
    }
}

/// C7 tuning: default broadcast destination/path, extra APRS-qualifying
/// destinations, msgid wrap, dedup window, and the C8 retry schedule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AprsConfig {
    #[serde(default = "default_aprs_destination")]
    pub aprs_destination: String,
    #[serde(default)]
    pub aprs_path: Vec<String>,
    #[serde(default)]
    pub listen_destinations: Vec<String>,
    #[serde(default)]
    pub listen_altnets: Vec<String>,
    #[serde(default = "default_msgid_modulo")]
    pub msgid_modulo: u32,
    #[serde(default = "default_deduplication_expiry_secs")]
    pub deduplication_expiry_secs: u64,
    #[serde(default = "default_retransmit_count")]
    pub retransmit_count: u32,
    #[serde(default = "default_retransmit_timeout_base_secs")]
    pub retransmit_timeout_base_secs: u64,
    #[serde(default = "default_retransmit_timeout_rand_secs")]
    pub retransmit_timeout_rand_secs: u64,
    #[serde(default = "default_retransmit_timeout_scale")]
    pub retransmit_timeout_scale: f64,
}

fn default_aprs_destination() -> String {
    "APRS".to_string()
}
fn default_msgid_modulo() -> u32 {
    1000
}
fn default_deduplication_expiry_secs() -> u64 {
    28
}
fn default_retransmit_count() -> u32 {
    2
}
fn default_retransmit_timeout_base_secs() -> u64 {
    30
}
fn default_retransmit_timeout_rand_secs() -> u64 {
    5
}
fn default_retransmit_timeout_scale() -> f64 {
    1.5
}

impl Default for AprsConfig {
    fn default() -> Self {
        AprsConfig {
            aprs_destination: default_aprs_destination(),
            aprs_path: Vec::new(),
            listen_destinations: Vec::new(),
            listen_altnets: Vec::new(),
            msgid_modulo: default_msgid_modulo(),
            deduplication_expiry_secs: default_deduplication_expiry_secs(),
            retransmit_count: default_retransmit_count(),
            retransmit_timeout_base_secs: default_retransmit_timeout_base_secs(),
            retransmit_timeout_rand_secs: default_retransmit_timeout_rand_secs(),
            retransmit_timeout_scale: default_retransmit_timeout_scale(),
        }
    }
}

impl AprsConfig {
    pub fn interface_config(&self, local_call: Callsign) -> Result<APRSInterfaceConfig, Error> {
        let aprs_path = self
            .aprs_path
            .iter()
            .map(|s| Callsign::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(APRSInterfaceConfig {
            local_call,
            aprs_destination: self.aprs_destination.clone(),
            aprs_path,
            listen_destinations: self.listen_destinations.clone(),
            listen_altnets: self.listen_altnets.clone(),
            msgid_modulo: self.msgid_modulo,
            deduplication_expiry: Duration::from_secs(self.deduplication_expiry_secs),
        })
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            retransmit_count: self.retransmit_count,
            retransmit_timeout_base: Duration::from_secs(self.retransmit_timeout_base_secs),
            retransmit_timeout_rand: Duration::from_secs(self.retransmit_timeout_rand_secs),
            retransmit_timeout_scale: self.retransmit_timeout_scale,
        }
    }
}

/// C9 tuning: whether digipeating runs at all, extra aliases beyond the
/// built-in `WIDE`/`RELAY`/`GATE`, and the queued-digipeat expiry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DigipeaterSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_digipeater_timeout_secs")]
    pub digipeater_timeout_secs: u64,
}

fn default_digipeater_timeout_secs() -> u64 {
    5
}

impl DigipeaterSettings {
    pub fn digipeater_timeout(&self) -> Duration {
        Duration::from_secs(self.digipeater_timeout_secs)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow::anyhow!(
                    "Configuration file not found: {}\n\
                     Hint: copy a sample config to {} and edit it, \
                     or pass --config to point at a different path.",
                    path.display(),
                    path.display()
                )
            } else {
                anyhow::anyhow!("failed to read config file {}: {}", path.display(), e)
            }
        })?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {}", path.display(), e))?;
        Ok(config)
    }
}
