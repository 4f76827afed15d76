use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read once from `VACANCY_*` environment variables.
/// Unset or unparseable numbers fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 7480,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparseable {name}={raw}");
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parsed(&lookup, "VACANCY_PORT").unwrap_or(defaults.port),
            bind: lookup("VACANCY_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("VACANCY_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_connections: parsed(&lookup, "VACANCY_MAX_CONNECTIONS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "VACANCY_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "VACANCY_METRICS_PORT"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("ledger.wal")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = from_pairs(&[]);
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.listen_addr(), "0.0.0.0:7480");
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/ledger.wal"));
    }

    #[test]
    fn overrides_apply() {
        let cfg = from_pairs(&[
            ("VACANCY_PORT", "9000"),
            ("VACANCY_BIND", "127.0.0.1"),
            ("VACANCY_DATA_DIR", "/var/lib/vacancy"),
            ("VACANCY_MAX_CONNECTIONS", "8"),
            ("VACANCY_COMPACT_THRESHOLD", "50"),
            ("VACANCY_METRICS_PORT", "9100"),
        ]);
        assert_eq!(cfg.listen_addr(), "127.0.0.1:9000");
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/vacancy/ledger.wal"));
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.metrics_port, Some(9100));
    }

    #[test]
    fn garbage_falls_back() {
        let cfg = from_pairs(&[
            ("VACANCY_PORT", "http"),
            ("VACANCY_MAX_CONNECTIONS", "0"),
            ("VACANCY_METRICS_PORT", "-1"),
        ]);
        assert_eq!(cfg.port, 7480);
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.metrics_port, None);
    }
}
