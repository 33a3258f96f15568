use std::path::PathBuf;

use crate::error::{Error, Result};

pub const DEFAULT_PREFIX: &str = "skx";
pub const MAX_PREFIX_LEN: usize = 9;
pub const PID_FILE: &str = "/var/run/redisfs.pid";

/// Mount-time options, bundled from CLI flags in place of the source's
/// process-wide globals.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub prefix: String,
    pub mountpoint: PathBuf,
    pub fast: bool,
    pub read_only: bool,
    pub debug_level: u8,
    pub threads: usize,
    pub allow_other: bool,
}

impl Config {
    pub fn validate_prefix(prefix: &str) -> Result<()> {
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN {
            return Err(Error::Config(format!(
                "prefix must be 1-{MAX_PREFIX_LEN} characters, got {} ({prefix:?})",
                prefix.len()
            )));
        }
        Ok(())
    }

    pub fn key_prefix(&self) -> &str {
        &self.prefix
    }
}

pub fn default_threads() -> usize {
    // MacFUSE has historically deadlocked multi-threaded mounts on ENODEV;
    // the teacher's tvix-store works around this by pinning to 1 thread on
    // macOS. This crate targets the same host platforms.
    #[cfg(target_os = "macos")]
    {
        1
    }
    #[cfg(not(target_os = "macos"))]
    {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_prefix() {
        assert!(Config::validate_prefix("").is_err());
    }

    #[test]
    fn rejects_overlong_prefix() {
        assert!(Config::validate_prefix("toolongprefix").is_err());
    }

    #[test]
    fn accepts_default_prefix() {
        assert!(Config::validate_prefix(DEFAULT_PREFIX).is_ok());
    }

    #[test]
    fn accepts_nine_char_prefix() {
        assert!(Config::validate_prefix("123456789").is_ok());
    }
}
