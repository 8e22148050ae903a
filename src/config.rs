use crate::error::{Error, Result};
use crate::transport::Status;

use std::collections::BTreeMap;
use std::str::FromStr;

use tracing::info;

/// Transport configuration options.
///
/// A flat set of `NAME = value` pairs handed to the backend when a context
/// is created. Options are usually read from the environment, where every
/// variable starting with the prefix contributes one option named by the
/// rest of the variable name.
///
/// # Examples
///
/// ```rust,ignore
/// let mut config = Config::from_env("UCXIO_");
/// config.modify("EAGER_THRESHOLD", "4096")?;
/// config.print();
/// ```
#[derive(Clone, Debug, Default)]
pub struct Config {
    options: BTreeMap<String, String>,
}

impl Config {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every environment variable starting with `prefix`.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Same as [`from_env`](Self::from_env), over an explicit variable list.
    pub fn from_vars<I>(prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let options = vars
            .into_iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(prefix)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest.to_owned(), value))
            })
            .collect();

        Self { options }
    }

    /// Sets an option, replacing any previous value.
    pub fn modify(&mut self, name: &str, value: &str) -> Result<()> {
        if name.is_empty() || name.contains('=') {
            return Err(Error::transport(
                Status::INVALID_PARAM,
                "failed to modify config",
            ));
        }

        self.options.insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    /// Returns the raw value of an option.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    /// Returns an option parsed as `T`, or `None` when unset or malformed.
    pub fn parse<T: FromStr>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|value| value.parse().ok())
    }

    /// Iterates over options in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Logs every option.
    pub fn print(&self) {
        for (name, value) in self.iter() {
            info!(target: "ucxio::config", "{name} = {value}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn test_from_vars_strips_prefix() {
        let vars = vec![
            ("UCXIO_EAGER_THRESHOLD".to_owned(), "128".to_owned()),
            ("UCXIO_".to_owned(), "ignored".to_owned()),
            ("HOME".to_owned(), "/root".to_owned()),
        ];

        let config = Config::from_vars("UCXIO_", vars);

        assert_eq!(config.get("EAGER_THRESHOLD"), Some("128"));
        assert_eq!(config.parse::<usize>("EAGER_THRESHOLD"), Some(128));
        assert_eq!(config.iter().count(), 1);
    }

    #[test]
    fn test_modify_rejects_bad_names() {
        let mut config = Config::new();

        assert!(config.modify("", "x").is_err());
        assert!(config.modify("A=B", "x").is_err());

        config.modify("TLS", "shm").unwrap();
        config.modify("TLS", "tcp").unwrap();
        assert_eq!(config.get("TLS"), Some("tcp"));
    }
}
