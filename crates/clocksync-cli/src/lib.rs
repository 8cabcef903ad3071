//! Command-line surfaces for the clocksync binaries

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser};

use clocksync_core::{ClockOffset, NodeId};
use clocksync_runtime::{
    CoordinatorConfig, LogFormat, NodeConfig, Rounding, TelemetryConfig, DEFAULT_PORT,
};

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| format!("{:?}: {}", s, e))
}

#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Log filter when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log format (pretty, compact, json)
    #[arg(long, default_value = "pretty")]
    pub log_format: LogFormat,
}

impl LogArgs {
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            level: self.log_level.clone(),
            format: self.log_format,
            ..Default::default()
        }
    }
}

/// Berkeley clock synchronization coordinator
#[derive(Parser, Debug)]
#[command(name = "clocksync-coordinator", version)]
pub struct CoordinatorArgs {
    /// Address to listen on
    #[arg(short, long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
    pub bind: SocketAddr,

    /// Per-call timeout for node queries and adjustments
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Nodes polled at once
    #[arg(long, default_value_t = 16)]
    pub max_concurrency: usize,

    /// Rounding of fractional adjustments (nearest, truncate)
    #[arg(long, default_value = "nearest")]
    pub rounding: Rounding,

    /// Do not send nodes the new reference time after a round
    #[arg(long)]
    pub no_checkpoints: bool,

    /// Also run a round on this period, e.g. "1m"
    #[arg(long, value_parser = parse_duration)]
    pub interval: Option<Duration>,

    /// Node ids to wait for before the first round (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub expect: Vec<String>,

    /// How long to wait for --expect nodes
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub wait: Duration,

    /// Skip the round that follows the wait for --expect nodes
    #[arg(long)]
    pub no_initial_round: bool,

    /// Serve without the interactive shell; stop with Ctrl-C
    #[arg(long)]
    pub no_shell: bool,

    #[command(flatten)]
    pub log: LogArgs,
}

impl CoordinatorArgs {
    pub fn config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            bind: self.bind,
            call_timeout: self.timeout,
            max_concurrency: self.max_concurrency,
            rounding: self.rounding,
            notify_checkpoints: !self.no_checkpoints,
            sync_interval: self.interval,
            expected_nodes: self.expect.iter().map(NodeId::new).collect(),
            registration_wait: self.wait,
            initial_round: !self.no_initial_round,
            ..Default::default()
        }
    }
}

/// Clock node that registers with a coordinator and follows its corrections
#[derive(Parser, Debug)]
#[command(name = "clocksync-node", version)]
pub struct NodeArgs {
    /// Identity, unique within the group
    pub id: String,

    /// Coordinator address
    #[arg(short, long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    pub coordinator: SocketAddr,

    /// Initial clock skew in seconds, may be negative
    #[arg(short, long, default_value_t = 0, allow_hyphen_values = true)]
    pub offset: i64,

    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:0")]
    pub bind: SocketAddr,

    /// Address the coordinator should call back (defaults to the source address)
    #[arg(long)]
    pub advertise: Option<SocketAddr>,

    /// Per-call timeout towards the coordinator
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Registration attempts before giving up
    #[arg(long, default_value_t = 5)]
    pub register_attempts: u32,

    #[command(flatten)]
    pub log: LogArgs,
}

impl NodeArgs {
    pub fn config(&self) -> NodeConfig {
        NodeConfig {
            bind: self.bind,
            advertise: self.advertise,
            initial_offset: ClockOffset::from_secs(self.offset),
            call_timeout: self.timeout,
            register_attempts: self.register_attempts,
            ..NodeConfig::new(self.id.as_str(), self.coordinator)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_defaults() {
        let args = CoordinatorArgs::try_parse_from(["clocksync-coordinator"]).unwrap();
        let config = args.config();
        assert_eq!(config.bind.port(), 1099);
        assert_eq!(config.call_timeout, Duration::from_secs(2));
        assert_eq!(config.rounding, Rounding::Nearest);
        assert!(config.notify_checkpoints);
        assert!(config.expected_nodes.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_coordinator_flags() {
        let args = CoordinatorArgs::try_parse_from([
            "clocksync-coordinator",
            "--expect",
            "client1,client2",
            "--wait",
            "5s",
            "--interval",
            "1m",
            "--rounding",
            "truncate",
            "--log-format",
            "json",
        ])
        .unwrap();
        let config = args.config();
        assert_eq!(config.expected_nodes, vec![NodeId::new("client1"), NodeId::new("client2")]);
        assert_eq!(config.registration_wait, Duration::from_secs(5));
        assert_eq!(config.sync_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.rounding, Rounding::Truncate);
        assert_eq!(args.log.telemetry().format, LogFormat::Json);
    }

    #[test]
    fn test_node_negative_offset() {
        let args = NodeArgs::try_parse_from(["clocksync-node", "client1", "--offset", "-29"]).unwrap();
        let config = args.config();
        assert_eq!(config.id, NodeId::new("client1"));
        assert_eq!(config.initial_offset, ClockOffset(-29_000));
        assert_eq!(config.coordinator, "127.0.0.1:1099".parse().unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_duration_rejected() {
        assert!(CoordinatorArgs::try_parse_from(["clocksync-coordinator", "--wait", "soon"]).is_err());
    }
}
