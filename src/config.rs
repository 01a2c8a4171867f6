use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorConfig {
    pub targets: Vec<TargetConfig>,
    /// Local address written into the SIP headers. Autodetected when absent
    /// or left as "0.0.0.0".
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default = "default_source_port")]
    pub source_port: u16,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub alerts: AlertConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TargetConfig {
    pub address: String,
    #[serde(default = "default_target_port")]
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AlertConfig {
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Token and chat id fall back to the TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID
/// environment variables when omitted here.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

fn default_target_port() -> u16 { 5060 }
fn default_source_port() -> u16 { 5084 }
fn default_interval() -> u64 { 10 }
fn default_receive_timeout() -> u64 { 2 }
fn default_report_interval() -> u64 { 3600 }
fn default_user_agent() -> String { "Rust SIP Monitor".into() }
