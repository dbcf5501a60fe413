use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroUsize,
    path::PathBuf,
    time::Duration,
};

use clap::Parser;

pub const DEFAULT_PORT: u16 = 9999;

/// Every option can also be supplied through the environment variable named
/// in its help text; missing required settings abort startup.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Keyspace holding the lookup tables.
    #[arg(long, env = "KEYSPACE_NAME")]
    pub keyspace: String,

    /// JSON snapshot the lookups are answered from.
    #[arg(long, env = "SNAPSHOT_PATH")]
    pub snapshot: PathBuf,

    /// Address to listen on.
    #[arg(long, env = "LISTEN_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub listen_host: IpAddr,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, env = "LISTEN_PORT", default_value_t = DEFAULT_PORT)]
    pub listen_port: u16,

    /// Maximum number of concurrent client connections (unlimited if unset).
    #[arg(long, env = "MAX_CONNECTIONS")]
    pub max_connections: Option<NonZeroUsize>,

    /// Deadline for a single backend lookup, in milliseconds.
    #[arg(
        long,
        env = "LOOKUP_TIMEOUT_MS",
        default_value_t = 5000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub lookup_timeout_ms: u64,
}

impl Cli {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_host, self.listen_port)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DEFAULT_LOOKUP_TIMEOUT;

    fn parse(extra: &[&str]) -> Result<Cli, clap::Error> {
        let base = ["socketmap-bridge", "--keyspace", "mail", "--snapshot", "mail.json"];
        Cli::try_parse_from(base.iter().chain(extra).copied())
    }

    #[test]
    fn defaults_match_the_documented_listener() {
        let cli = parse(&[]).expect("valid arguments");
        assert_eq!(cli.keyspace, "mail");
        assert_eq!(cli.listen_addr(), "127.0.0.1:9999".parse().expect("addr"));
        assert_eq!(cli.lookup_timeout(), DEFAULT_LOOKUP_TIMEOUT);
        assert!(cli.max_connections.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let cli = parse(&[
            "--listen-host",
            "0.0.0.0",
            "--listen-port",
            "10025",
            "--max-connections",
            "64",
            "--lookup-timeout-ms",
            "1500",
        ])
        .expect("valid arguments");
        assert_eq!(cli.listen_addr(), "0.0.0.0:10025".parse().expect("addr"));
        assert_eq!(cli.max_connections.map(NonZeroUsize::get), Some(64));
        assert_eq!(cli.lookup_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(parse(&["--listen-port", "smtp"]).is_err());
        assert!(parse(&["--listen-port", "70000"]).is_err());
        assert!(parse(&["--max-connections", "0"]).is_err());
        assert!(parse(&["--lookup-timeout-ms", "0"]).is_err());
    }
}
