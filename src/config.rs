use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;

/// The vehicles endpoint accepts at most this many route ids per request.
pub const MAX_ROUTES_PER_CALL: usize = 10;

const DEFAULT_BASE_URL: &str = "http://realtime.portauthority.org/bustime/api/v3";

// The feed name can be obtained by querying the /getrtpidatafeeds endpoint.
const DEFAULT_FEED: &str = "Port Authority Bus";

#[derive(Parser, Debug)]
#[command(
    name = "bustime-collector",
    about = "Polls a BusTime feed for vehicle positions (and optionally arrival \
             predictions) and checkpoints them to CSV files"
)]
pub struct Args {
    /// BusTime API key
    #[arg(long, env = "BUSTIME_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Comma-separated route ids to observe, at most 10 (e.g. '61A,61B,71D')
    #[arg(long, value_delimiter = ',')]
    pub routes: Vec<String>,

    /// Pause between polling ticks
    #[arg(long, default_value = "3s", value_parser = humantime::parse_duration)]
    pub interval: Duration,

    /// Total number of polling ticks
    #[arg(long, default_value_t = 3600)]
    pub ticks: u32,

    /// Write a checkpoint every this many ticks
    #[arg(long, default_value_t = 600)]
    pub flush_every: u32,

    /// Also collect arrival predictions for the observed vehicles
    #[arg(long)]
    pub predictions: bool,

    /// Directory checkpoint files are written to
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Stop collecting once this many API calls have been issued
    #[arg(long)]
    pub max_calls: Option<u64>,

    /// BusTime service root
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// rtpidatafeed parameter sent with every request
    #[arg(long, default_value = DEFAULT_FEED)]
    pub feed: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub feed: String,
    pub routes: Vec<String>,
    pub interval: Duration,
    pub ticks: u32,
    pub flush_every: u32,
    pub predictions: bool,
    pub output_dir: PathBuf,
    pub max_calls: Option<u64>,
}

impl TryFrom<Args> for Config {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let api_key = args.api_key.ok_or(ConfigError::MissingApiKey)?;

        if args.routes.is_empty() {
            return Err(ConfigError::NoRoutes);
        }
        if args.routes.len() > MAX_ROUTES_PER_CALL {
            return Err(ConfigError::TooManyRoutes(args.routes.len()));
        }
        if args.flush_every == 0 {
            return Err(ConfigError::ZeroFlushCadence);
        }

        fs::create_dir_all(&args.output_dir).map_err(|source| ConfigError::OutputDir {
            path: args.output_dir.clone(),
            source,
        })?;

        Ok(Config {
            api_key,
            base_url: args.base_url,
            feed: args.feed,
            routes: args.routes,
            interval: args.interval,
            ticks: args.ticks,
            flush_every: args.flush_every,
            predictions: args.predictions,
            output_dir: args.output_dir,
            max_calls: args.max_calls,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn args(routes: &[&str]) -> Args {
        Args {
            api_key: Some("SECRET".to_owned()),
            routes: routes.iter().map(|r| (*r).to_owned()).collect(),
            interval: Duration::from_secs(3),
            ticks: 3600,
            flush_every: 600,
            predictions: false,
            output_dir: PathBuf::from("."),
            max_calls: None,
            base_url: DEFAULT_BASE_URL.to_owned(),
            feed: DEFAULT_FEED.to_owned(),
        }
    }

    #[test]
    fn accepts_a_plain_run() {
        let config = Config::try_from(args(&["61A", "61B"])).unwrap();
        assert_eq!(config.routes, vec!["61A", "61B"]);
        assert_eq!(config.flush_every, 600);
    }

    #[test]
    fn rejects_a_missing_api_key() {
        let mut missing_key = args(&["61A"]);
        missing_key.api_key = None;
        assert!(matches!(
            Config::try_from(missing_key),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn rejects_an_empty_route_list() {
        assert!(matches!(
            Config::try_from(args(&[])),
            Err(ConfigError::NoRoutes)
        ));
    }

    #[test]
    fn rejects_more_routes_than_one_request_can_carry() {
        let routes: Vec<String> = (0..11).map(|i| format!("6{i}")).collect();
        let refs: Vec<&str> = routes.iter().map(String::as_str).collect();
        assert!(matches!(
            Config::try_from(args(&refs)),
            Err(ConfigError::TooManyRoutes(11))
        ));
    }

    #[test]
    fn rejects_a_zero_flush_cadence() {
        let mut no_cadence = args(&["61A"]);
        no_cadence.flush_every = 0;
        assert!(matches!(
            Config::try_from(no_cadence),
            Err(ConfigError::ZeroFlushCadence)
        ));
    }
}
