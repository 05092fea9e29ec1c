use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;

use crate::scheduler::PolicyKind;

#[derive(Parser, Clone)]
pub struct DaemonArgs {
    #[arg(
        long,
        default_value = "8",
        help = "Number of channels to provision when no inventory file is given"
    )]
    pub channel_count: u32,

    #[arg(
        long,
        default_value = "18000",
        help = "Lower bound of the characterised data-rate range"
    )]
    pub rate_min: u32,

    #[arg(
        long,
        default_value = "68000",
        help = "Upper bound of the characterised data-rate range"
    )]
    pub rate_max: u32,

    #[arg(
        long,
        env = "CHANSCHED_INVENTORY_PATH",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to a YAML channel inventory, e.g. /etc/chansched/channels.yaml"
    )]
    pub inventory_path: Option<PathBuf>,

    #[arg(
        long,
        value_enum,
        default_value_t = PolicyKind::GreedyFifo,
        help = "Matching policy for the lifetime of this process"
    )]
    pub policy: PolicyKind,

    #[arg(
        long,
        default_value = "0.0",
        help = "Fairness dampening coefficient for the proportional-fair policy, 0 disables dampening"
    )]
    pub alpha: f64,

    #[arg(
        long,
        default_value = "5000",
        help = "Allocation polling interval in milliseconds"
    )]
    pub interval_ms: u64,

    #[arg(
        long,
        default_value = "10000",
        help = "Fairness sampling interval in milliseconds"
    )]
    pub monitor_interval_ms: u64,

    #[arg(
        long,
        env = "CHANSCHED_STORE_PATH",
        value_hint = clap::ValueHint::FilePath,
        default_value = "chansched-requests.json",
        help = "Durable request store, replayed on restart"
    )]
    pub store_path: PathBuf,

    #[arg(long, help = "Seed the data-rate draws for reproducible runs")]
    pub seed: Option<u64>,
}

/// Explicit channel inventory, as an alternative to drawing
/// `--channel-count` rates at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelInventory {
    pub channels: Vec<ChannelSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSpec {
    pub id: u32,
    pub data_rate: u32,
}

impl ChannelInventory {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading channel inventory {}", path.display()))?;
        let inventory: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing channel inventory {}", path.display()))?;
        Ok(inventory)
    }
}
