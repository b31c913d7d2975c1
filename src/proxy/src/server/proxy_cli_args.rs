use clap::Parser;

#[derive(Parser, Default, Debug, Clone)]
#[clap(
    name = "rwsplit-proxy",
    version = "0.1.0",
    about = "read/write-splitting proxy for MySQL fleets."
)]
pub struct ProxyServerArgs {
    /// Config file path; defaults to data/config/proxy.yaml with a
    /// development fallback two directories up.
    #[clap(long, value_name = "PATH")]
    pub config: Option<String>,
    /// Write a CPU profile (pprof flamegraph) for the run into this
    /// directory.
    #[clap(long, value_name = "PATH")]
    pub cpuprofile: Option<String>,
    /// Log every routed statement with its target backend.
    #[clap(long, default_value_t = false)]
    pub log_queries: bool,
    #[clap(long, value_name = "LOG_LEVEL")]
    pub log_level: Option<String>,
    /// Overrides the configured listen address. For testing.
    #[clap(long, value_name = "ADDR")]
    pub listen_address: Option<String>,
    #[clap(long, value_name = "WORKERS", default_value_t = 4)]
    pub workers: usize,
}

impl ProxyServerArgs {
    pub fn log_level_or_default(&self) -> String {
        self.log_level.clone().unwrap_or_else(|| "INFO".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let args = ProxyServerArgs::parse_from(["rwsplit-proxy"]);
        assert!(args.config.is_none());
        assert!(!args.log_queries);
        assert_eq!(args.workers, 4);
        assert_eq!(args.log_level_or_default(), "INFO");
    }

    #[test]
    fn flags_parse() {
        let args = ProxyServerArgs::parse_from([
            "rwsplit-proxy",
            "--config",
            "/etc/rwsplit/proxy.yaml",
            "--cpuprofile",
            "/tmp/prof",
            "--log-queries",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.config.as_deref(), Some("/etc/rwsplit/proxy.yaml"));
        assert_eq!(args.cpuprofile.as_deref(), Some("/tmp/prof"));
        assert!(args.log_queries);
        assert_eq!(args.log_level_or_default(), "debug");
    }
}
