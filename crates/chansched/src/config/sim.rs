use clap::Parser;

use crate::sim::SimConfig;

#[derive(Parser, Clone)]
pub struct SimulateArgs {
    #[arg(long, default_value = "10", help = "Number of simulated requesters")]
    pub requesters: u32,

    #[arg(long, default_value = "4", help = "Number of channels in the pool")]
    pub channels: u32,

    #[arg(long, default_value = "18000")]
    pub rate_min: u32,

    #[arg(long, default_value = "68000")]
    pub rate_max: u32,

    #[arg(long, default_value = "200.0", help = "Virtual seconds to simulate")]
    pub duration: f64,

    #[arg(
        long,
        default_value = "1.0",
        help = "Mean of the exponential channel-hold time"
    )]
    pub mean_service: f64,

    #[arg(
        long,
        default_value = "0.5",
        help = "Mean of the exponential think time between requests"
    )]
    pub mean_think: f64,

    #[arg(
        long,
        default_value = "0.0",
        help = "Fairness dampening coefficient, 0 disables dampening"
    )]
    pub alpha: f64,

    #[arg(long, default_value = "7")]
    pub seed: u64,
}

impl SimulateArgs {
    pub fn into_config(self) -> SimConfig {
        let defaults = SimConfig::default();
        SimConfig {
            requesters: self.requesters,
            channels: self.channels,
            rate_min: self.rate_min,
            rate_max: self.rate_max,
            duration: self.duration,
            tick: defaults.tick,
            monitor_interval: defaults.monitor_interval,
            mean_service: self.mean_service,
            mean_think: self.mean_think,
            alpha: self.alpha,
            seed: self.seed,
        }
    }
}
