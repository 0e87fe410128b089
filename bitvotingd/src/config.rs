use std::path::{Path, PathBuf};

use bitvoting::{MiningConfig, NodeConfig};
use bitvoting::net::NetConfig;
use clap::{Arg, ArgAction, Command};

/// Daemon configuration. Values come from, in rising priority: built-in
/// defaults, `<dataDir>/config.cfg`, command-line flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub port: u16,
    pub flooding_ttl: i32,
    pub heartbeat_ms: u64,
    pub duplicate_validity_ms: i64,
    pub ping_interval_ms: u64,
    pub max_connections: usize,
    pub threads_mining: usize,
    pub log_cli: bool,
    pub log_file: bool,
    pub connect: Vec<String>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            data_dir: PathBuf::from(".bitvoting"),
            port: 8580,
            flooding_ttl: 3,
            heartbeat_ms: 30 * 60 * 1000,
            duplicate_validity_ms: 60 * 1000,
            ping_interval_ms: 5 * 60 * 1000,
            max_connections: 32,
            threads_mining: 2,
            log_cli: true,
            log_file: true,
            connect: Vec::new(),
        }
    }
}

fn command() -> Command {
    Command::new("bitvotingd")
        .about("bitvoting network daemon")
        .arg(
            Arg::new("datadir")
                .long("datadir")
                .value_name("DIR")
                .help("Data directory [.bitvoting]"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .help("Listening port [8580]"),
        )
        .arg(
            Arg::new("flooding-ttl")
                .long("flooding-ttl")
                .value_name("HOPS")
                .help("TTL for flooded messages [3]"),
        )
        .arg(
            Arg::new("heartbeat")
                .long("heartbeat")
                .value_name("MS")
                .help("Heartbeat interval in milliseconds [1800000]"),
        )
        .arg(
            Arg::new("duplicate-validity")
                .long("duplicate-validity")
                .value_name("MS")
                .help("Duplicate suppression window in milliseconds [60000]"),
        )
        .arg(
            Arg::new("ping-interval")
                .long("ping-interval")
                .value_name("MS")
                .help("Peer discovery ping interval in milliseconds [300000]"),
        )
        .arg(
            Arg::new("max-connections")
                .long("max-connections")
                .value_name("N")
                .help("Maximum number of peer connections [32]"),
        )
        .arg(
            Arg::new("threads-mining")
                .long("threads-mining")
                .value_name("N")
                .help("Mining worker threads, 0 = hardware concurrency [2]"),
        )
        .arg(
            Arg::new("log-cli")
                .long("log-cli")
                .value_name("BOOL")
                .help("Log to the console [true]"),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_name("BOOL")
                .help("Log to <datadir>/bitvoting.log [true]"),
        )
        .arg(
            Arg::new("connect")
                .long("connect")
                .value_name("HOST:PORT")
                .action(ArgAction::Append)
                .help("Peer to connect to at startup (repeatable)"),
        )
}

#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<(), ConfigError> {
    let parse_err = |what: &str| ConfigError(format!("invalid value for {}: {}", what, value));
    match key {
        "port" => config.port = value.parse().map_err(|_| parse_err(key))?,
        "flooding-ttl" => config.flooding_ttl = value.parse().map_err(|_| parse_err(key))?,
        "heartbeat" => config.heartbeat_ms = value.parse().map_err(|_| parse_err(key))?,
        "duplicate-validity" => {
            config.duplicate_validity_ms = value.parse().map_err(|_| parse_err(key))?
        }
        "ping-interval" => config.ping_interval_ms = value.parse().map_err(|_| parse_err(key))?,
        "max-connections" => {
            config.max_connections = value.parse().map_err(|_| parse_err(key))?
        }
        "threads-mining" => config.threads_mining = value.parse().map_err(|_| parse_err(key))?,
        "log-cli" => config.log_cli = value.parse().map_err(|_| parse_err(key))?,
        "log-file" => config.log_file = value.parse().map_err(|_| parse_err(key))?,
        "connect" => config.connect.push(value.to_owned()),
        other => return Err(ConfigError(format!("unknown option: {}", other))),
    }
    Ok(())
}

/// Read `key = value` lines; `#` starts a comment.
fn apply_config_file(config: &mut Config, path: &Path) -> Result<(), ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| ConfigError(format!("cannot read {}: {}", path.display(), err)))?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| ConfigError(format!("malformed line: {}", line)))?;
        apply(config, key.trim(), value.trim())?;
    }
    Ok(())
}

/// Parse the command line and the config file in the data directory.
pub fn parse() -> Result<Config, ConfigError> {
    let matches = command().get_matches();
    let mut config = Config::default();

    if let Some(dir) = matches.get_one::<String>("datadir") {
        config.data_dir = PathBuf::from(dir);
    }

    let config_file = config.data_dir.join("config.cfg");
    if config_file.exists() {
        apply_config_file(&mut config, &config_file)?;
    }

    // command-line flags override the file
    for key in [
        "port",
        "flooding-ttl",
        "heartbeat",
        "duplicate-validity",
        "ping-interval",
        "max-connections",
        "threads-mining",
        "log-cli",
        "log-file",
    ] {
        if let Some(value) = matches.get_one::<String>(key) {
            apply(&mut config, key, value)?;
        }
    }
    if let Some(peers) = matches.get_many::<String>("connect") {
        for peer in peers {
            apply(&mut config, "connect", peer)?;
        }
    }

    Ok(config)
}

impl Config {
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            net: NetConfig {
                port: self.port,
                flood_ttl: self.flooding_ttl,
                max_connections: self.max_connections,
                heartbeat_interval_ms: self.heartbeat_ms,
                duplicate_validity_ms: self.duplicate_validity_ms,
                ping_interval_ms: self.ping_interval_ms,
            },
            mining: MiningConfig {
                threads: self.threads_mining,
                ..MiningConfig::default()
            },
            connect: self.connect.clone(),
        }
    }
}
