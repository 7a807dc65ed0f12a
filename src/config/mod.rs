use lazy_static::lazy_static;
use log::warn;
use std::env;
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_REGISTRY_CAPACITY: usize = 32;
pub const DEFAULT_MAX_LINE: usize = 1024;
pub const DEFAULT_NULL_DEVICE: &str = "/dev/null";

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Initial capacity of every job registry.
    pub registry_capacity: usize,
    /// Longest input line accepted, in bytes.
    pub max_line_length: usize,
    /// Standard input of background jobs without an explicit `<` redirect.
    pub null_device: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            max_line_length: DEFAULT_MAX_LINE,
            null_device: DEFAULT_NULL_DEVICE.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        Config {
            registry_capacity: parse_var(&lookup, "JOBSH_REGISTRY_CAPACITY", defaults.registry_capacity)
                .max(1),
            max_line_length: parse_var(&lookup, "JOBSH_MAX_LINE", defaults.max_line_length).max(1),
            null_device: lookup("JOBSH_NULL_DEVICE")
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.null_device),
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring invalid value {:?} for {}", raw, key);
            default
        }),
        None => default,
    }
}

lazy_static! {
    pub static ref CONFIG: Arc<Config> = Arc::new(Config::from_env());
}
