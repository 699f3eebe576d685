//! CLI argument parsing using clap v4

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::{Args, Parser, Subcommand};

use crate::types::StatisticsPeriod;

/// Hub Client - command line access to a home-automation hub
///
/// Connects to the hub's WebSocket API, logs in with a long-lived access
/// token, and runs queries or streams live state changes.
#[derive(Parser, Debug)]
#[command(name = "hub-client")]
#[command(author, version, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(short, long, env = "HUB_CONFIG", global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream state changes until interrupted
    Watch {
        /// Only show these entities (repeatable); prefix match when ending in '.'
        #[arg(short, long = "entity")]
        entities: Vec<String>,
    },

    /// List every entity state
    States {
        /// Only show entities of this domain (e.g. "light")
        #[arg(short, long)]
        domain: Option<String>,
    },

    /// Show one entity state
    State {
        /// Entity id, e.g. sensor.living_room_temperature
        entity_id: String,
    },

    /// Call a service
    Call {
        /// Service domain, e.g. light
        domain: String,

        /// Service name, e.g. turn_on
        service: String,

        /// Service data as a JSON object
        #[arg(short, long)]
        data: Option<String>,
    },

    /// Fetch raw state history
    History {
        /// Entity ids to fetch
        #[arg(required = true)]
        entity_ids: Vec<String>,

        #[command(flatten)]
        window: TimeWindow,

        /// Ask the hub for the reduced response format
        #[arg(long)]
        minimal: bool,
    },

    /// Fetch aggregated long-term statistics
    Statistics {
        /// Statistic ids to fetch
        #[arg(required = true)]
        statistic_ids: Vec<String>,

        #[command(flatten)]
        window: TimeWindow,

        /// Aggregation period: 5minute, hour, day, week, month
        #[arg(short, long, default_value = "hour")]
        period: StatisticsPeriod,
    },

    /// Measure round-trip latency to the hub
    Ping {
        /// Number of pings to send
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Display version and build information
    Version,
}

/// Time range shared by the history and statistics queries
#[derive(Args, Debug, Clone)]
pub struct TimeWindow {
    /// Window start (RFC 3339); defaults to `--hours` before the end
    #[arg(long)]
    pub start: Option<DateTime<Utc>>,

    /// Window end (RFC 3339); defaults to now
    #[arg(long)]
    pub end: Option<DateTime<Utc>>,

    /// Window length in hours when --start is not given
    #[arg(long, default_value = "24")]
    pub hours: u32,
}

impl TimeWindow {
    pub fn resolve(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = self.end.unwrap_or(now);
        let start = self
            .start
            .unwrap_or_else(|| end - ChronoDuration::hours(i64::from(self.hours)));
        (start, end)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration
    Show,

    /// Write a commented default configuration file
    Init {
        /// Where to create the file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Check that the configuration loads and validates
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_watch_filters() {
        let cli = Cli::parse_from(["hub-client", "watch", "-e", "light.", "--entity", "sensor.x"]);
        match cli.command {
            Commands::Watch { entities } => assert_eq!(entities, vec!["light.", "sensor.x"]),
            _ => panic!("Expected Watch command"),
        }
    }

    #[test]
    fn test_state_command() {
        let cli = Cli::parse_from(["hub-client", "state", "sensor.temperature"]);
        match cli.command {
            Commands::State { entity_id } => assert_eq!(entity_id, "sensor.temperature"),
            _ => panic!("Expected State command"),
        }
    }

    #[test]
    fn test_call_with_data() {
        let cli = Cli::parse_from([
            "hub-client",
            "call",
            "light",
            "turn_on",
            "--data",
            r#"{"entity_id":"light.kitchen"}"#,
        ]);
        match cli.command {
            Commands::Call { domain, service, data } => {
                assert_eq!(domain, "light");
                assert_eq!(service, "turn_on");
                assert!(data.unwrap().contains("light.kitchen"));
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_statistics_period() {
        let cli = Cli::parse_from(["hub-client", "statistics", "sensor.energy", "--period", "5minute"]);
        match cli.command {
            Commands::Statistics { statistic_ids, period, window } => {
                assert_eq!(statistic_ids, vec!["sensor.energy"]);
                assert_eq!(period, StatisticsPeriod::FiveMinute);
                assert_eq!(window.hours, 24);
            }
            _ => panic!("Expected Statistics command"),
        }
    }

    #[test]
    fn test_statistics_rejects_bad_period() {
        let result = Cli::try_parse_from(["hub-client", "statistics", "sensor.energy", "--period", "fortnight"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_history_requires_ids() {
        assert!(Cli::try_parse_from(["hub-client", "history"]).is_err());
    }

    #[test]
    fn test_history_window() {
        let cli = Cli::parse_from([
            "hub-client",
            "history",
            "sensor.a",
            "--start",
            "2024-03-01T00:00:00Z",
            "--end",
            "2024-03-01T06:00:00Z",
            "--minimal",
        ]);
        match cli.command {
            Commands::History { window, minimal, .. } => {
                assert!(minimal);
                let (start, end) = window.resolve(Utc::now());
                assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
                assert_eq!(end, Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap());
            }
            _ => panic!("Expected History command"),
        }
    }

    #[test]
    fn test_window_defaults_to_hours_before_now() {
        let window = TimeWindow {
            start: None,
            end: None,
            hours: 6,
        };
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let (start, end) = window.resolve(now);
        assert_eq!(end, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["hub-client", "-vv", "--config", "/tmp/hub.toml", "ping"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
        assert_eq!(cli.config.as_deref(), Some("/tmp/hub.toml"));
        match cli.command {
            Commands::Ping { count } => assert_eq!(count, 1),
            _ => panic!("Expected Ping command"),
        }
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["hub-client", "config", "init", "--force"]);
        match cli.command {
            Commands::Config {
                subcommand: ConfigSubcommand::Init { path, force },
            } => {
                assert!(path.is_none());
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
