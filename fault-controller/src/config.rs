// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use anyhow::{anyhow, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PROXY_RETRY_COUNT: u32 = 3;
const DEFAULT_PROXY_TIMEOUT_MS: u64 = 500;
const DEFAULT_CONTROLLER_PORT: u16 = 5000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base `host:port` addresses of the sidecar proxies forming the fleet.
    pub proxy_list: Vec<String>,
    /// Maximum attempts per proxy for register/unregister calls.
    pub proxy_retry_count: u32,
    /// Per-attempt bound on a single proxy call.
    pub proxy_timeout: Duration,
    pub port: u16,
    /// Debug mode disables data eviction on unregistration and enables
    /// raw-export capture for audit.
    pub debug_mode: bool,
    pub max_request_content_length: usize,
}

impl Config {
    pub fn new() -> Result<Config> {
        let proxy_list = env::var("PROXY_LIST")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|proxy| !proxy.is_empty())
            .map(String::from)
            .collect();

        Ok(Config {
            proxy_list,
            proxy_retry_count: parse_env::int("PROXY_RETRY_COUNT")?
                .unwrap_or(DEFAULT_PROXY_RETRY_COUNT),
            proxy_timeout: Duration::from_millis(
                parse_env::int("PROXY_TIMEOUT_MS")?.unwrap_or(DEFAULT_PROXY_TIMEOUT_MS),
            ),
            port: parse_env::int("CONTROLLER_PORT")?.unwrap_or(DEFAULT_CONTROLLER_PORT),
            debug_mode: parse_env::bool("DEBUG_MODE").unwrap_or(false),
            max_request_content_length: 10 * 1024 * 1024, // 10MB in Bytes
        })
    }
}

pub mod parse_env {
    use super::*;

    /// Parses an integer-like env var. Unset is `Ok(None)`; a set but
    /// unparsable value is an error rather than a silent default.
    pub fn int<T: FromStr>(name: &str) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Err(_) => Ok(None),
            Ok(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e| anyhow!("invalid {name} value {raw:?}: {e}")),
        }
    }

    pub fn bool(name: &str) -> Option<bool> {
        match env::var(name).ok()?.as_str() {
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
            _ => Some(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_parsing() {
        env::set_var("FAULT_CONTROLLER_TEST_INT", "7");
        assert_eq!(
            parse_env::int::<u32>("FAULT_CONTROLLER_TEST_INT").unwrap(),
            Some(7)
        );

        env::set_var("FAULT_CONTROLLER_TEST_INT", "not-a-number");
        assert!(parse_env::int::<u32>("FAULT_CONTROLLER_TEST_INT").is_err());

        env::remove_var("FAULT_CONTROLLER_TEST_INT");
        assert_eq!(
            parse_env::int::<u32>("FAULT_CONTROLLER_TEST_INT").unwrap(),
            None
        );
    }

    #[test]
    fn bool_parsing() {
        env::set_var("FAULT_CONTROLLER_TEST_BOOL", "true");
        assert_eq!(parse_env::bool("FAULT_CONTROLLER_TEST_BOOL"), Some(true));

        env::set_var("FAULT_CONTROLLER_TEST_BOOL", "no");
        assert_eq!(parse_env::bool("FAULT_CONTROLLER_TEST_BOOL"), Some(false));

        env::remove_var("FAULT_CONTROLLER_TEST_BOOL");
        assert_eq!(parse_env::bool("FAULT_CONTROLLER_TEST_BOOL"), None);
    }
}
