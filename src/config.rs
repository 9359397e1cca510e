// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names, default values and the
//! immutable [`GatewayConfig`] resolved once at startup. Every component of
//! the authentication pipeline receives the config by reference; nothing in
//! the request path reads the process environment.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `ENVIRONMENT` | `production`, `staging`, `local` or `test` | `production` |
//! | `E2E_TESTING` | E2E bypass signal | off |
//! | `STAGING_E2E_TEST` | Staging E2E bypass signal | off |
//! | `PYTEST_RUNNING` | Test-runner signal (needs the allow flag) | off |
//! | `AUTH_ALLOW_TEST_RUNNER_BYPASS` | Allow the test-runner signal | off |
//! | `DEMO_MODE` | Demo bypass signal | off |
//! | `AUTH_BYPASS_DISABLED` | Never grant a bypass | off |
//! | `IDENTITY_SERVICE_URL` | Identity service base URL | `http://localhost:8081` |
//! | `IDENTITY_SERVICE_ID` | Service id header for the identity service | none |
//! | `IDENTITY_SERVICE_SECRET` | Service secret header for the identity service | none |
//! | `IDENTITY_REQUEST_TIMEOUT_MS` | Per-request HTTP timeout | `2000` |
//! | `AUTH_HANDSHAKE_TIMEOUT_MS` | Deadline for one authentication | `8000` |
//! | `AUTH_MAX_ATTEMPTS` | Override retry budget | per environment |
//! | `AUTH_RETRY_BASE_DELAY_MS` | Override backoff base | per environment |
//! | `AUTH_RETRY_MAX_DELAY_MS` | Override backoff cap | per environment |
//! | `CIRCUIT_FAILURE_THRESHOLD` | Failures before the breaker opens | `5` |
//! | `CIRCUIT_RECOVERY_TIMEOUT_MS` | Open duration before a trial call | `30000` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files; HTTPS when both are set | plain HTTP |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;

pub const ENVIRONMENT_ENV: &str = "ENVIRONMENT";
pub const E2E_TESTING_ENV: &str = "E2E_TESTING";
pub const STAGING_E2E_TEST_ENV: &str = "STAGING_E2E_TEST";
pub const PYTEST_RUNNING_ENV: &str = "PYTEST_RUNNING";
pub const ALLOW_TEST_RUNNER_BYPASS_ENV: &str = "AUTH_ALLOW_TEST_RUNNER_BYPASS";
pub const DEMO_MODE_ENV: &str = "DEMO_MODE";
pub const BYPASS_DISABLED_ENV: &str = "AUTH_BYPASS_DISABLED";
pub const IDENTITY_SERVICE_URL_ENV: &str = "IDENTITY_SERVICE_URL";
pub const IDENTITY_SERVICE_ID_ENV: &str = "IDENTITY_SERVICE_ID";
pub const IDENTITY_SERVICE_SECRET_ENV: &str = "IDENTITY_SERVICE_SECRET";
pub const IDENTITY_REQUEST_TIMEOUT_ENV: &str = "IDENTITY_REQUEST_TIMEOUT_MS";
pub const HANDSHAKE_TIMEOUT_ENV: &str = "AUTH_HANDSHAKE_TIMEOUT_MS";
pub const MAX_ATTEMPTS_ENV: &str = "AUTH_MAX_ATTEMPTS";
pub const RETRY_BASE_DELAY_ENV: &str = "AUTH_RETRY_BASE_DELAY_MS";
pub const RETRY_MAX_DELAY_ENV: &str = "AUTH_RETRY_MAX_DELAY_MS";
pub const CIRCUIT_FAILURE_THRESHOLD_ENV: &str = "CIRCUIT_FAILURE_THRESHOLD";
pub const CIRCUIT_RECOVERY_TIMEOUT_ENV: &str = "CIRCUIT_RECOVERY_TIMEOUT_MS";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

const DEFAULT_IDENTITY_SERVICE_URL: &str = "http://localhost:8081";
const DEFAULT_IDENTITY_REQUEST_TIMEOUT: Duration = Duration::from_millis(2_000);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(8_000);
const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_CIRCUIT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

/// Deployment environment the gateway runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    Local,
    Test,
}

impl Environment {
    /// Parse an `ENVIRONMENT` value (case-insensitive, common aliases).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Environment::Production),
            "staging" | "stage" => Some(Environment::Staging),
            "local" | "development" | "dev" => Some(Environment::Local),
            "test" | "testing" => Some(Environment::Test),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Local => "local",
            Environment::Test => "test",
        }
    }

    pub fn is_production(&self) -> bool {
        *self == Environment::Production
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry budget and backoff for identity service calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Default policy for an environment.
    ///
    /// Staging absorbs more network variance, production fails faster and
    /// local/test keep feedback quick.
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
            },
            Environment::Staging => Self {
                max_attempts: 5,
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(2),
            },
            Environment::Local | Environment::Test => Self {
                max_attempts: 2,
                base_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(200),
            },
        }
    }

    /// Backoff before the retry that follows `attempt` (zero-based):
    /// `min(base_delay * 2^attempt, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        std::cmp::min(self.base_delay.saturating_mul(factor), self.max_delay)
    }
}

/// Environment signals that can mark a handshake as a test/bypass context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BypassSignals {
    pub e2e_testing: bool,
    pub staging_e2e_test: bool,
    pub test_runner: bool,
    pub allow_test_runner_bypass: bool,
    pub demo_mode: bool,
    /// Kill switch: no bypass is ever granted when set.
    pub disabled: bool,
}

impl BypassSignals {
    /// Names of the env vars currently asking for a bypass. The test runner
    /// flag only counts together with its allow flag.
    pub fn active(&self) -> Vec<&'static str> {
        let mut active = Vec::new();
        if self.e2e_testing {
            active.push(E2E_TESTING_ENV);
        }
        if self.staging_e2e_test {
            active.push(STAGING_E2E_TEST_ENV);
        }
        if self.test_runner && self.allow_test_runner_bypass {
            active.push(PYTEST_RUNNING_ENV);
        }
        if self.demo_mode {
            active.push(DEMO_MODE_ENV);
        }
        active
    }
}

/// Identity service connection settings.
#[derive(Debug, Clone)]
pub struct IdentityServiceConfig {
    pub base_url: String,
    pub service_id: Option<String>,
    pub service_secret: Option<String>,
    pub request_timeout: Duration,
    pub circuit_failure_threshold: u32,
    pub circuit_recovery_timeout: Duration,
}

impl Default for IdentityServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_IDENTITY_SERVICE_URL.to_string(),
            service_id: None,
            service_secret: None,
            request_timeout: DEFAULT_IDENTITY_REQUEST_TIMEOUT,
            circuit_failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            circuit_recovery_timeout: DEFAULT_CIRCUIT_RECOVERY_TIMEOUT,
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Certificate and key PEM paths; HTTPS is served only when both are set.
    pub tls: Option<(PathBuf, PathBuf)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: None,
        }
    }
}

/// Immutable gateway configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub environment: Environment,
    pub bypass: BypassSignals,
    pub retry: RetryPolicy,
    pub handshake_timeout: Duration,
    pub identity: IdentityServiceConfig,
    pub server: ServerConfig,
}

impl GatewayConfig {
    /// Configuration for an environment with every default applied.
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            bypass: BypassSignals::default(),
            retry: RetryPolicy::for_environment(environment),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            identity: IdentityServiceConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// An unset or unrecognised `ENVIRONMENT` resolves to production so a
    /// misconfigured deployment can never expose the bypass path.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup(ENVIRONMENT_ENV) {
            Some(raw) => Environment::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Unrecognised ENVIRONMENT, assuming production");
                Environment::Production
            }),
            None => Environment::Production,
        };

        let flag = |name: &str| lookup(name).map(|v| parse_flag(&v)).unwrap_or(false);

        let bypass = BypassSignals {
            e2e_testing: flag(E2E_TESTING_ENV),
            staging_e2e_test: flag(STAGING_E2E_TEST_ENV),
            test_runner: flag(PYTEST_RUNNING_ENV),
            allow_test_runner_bypass: flag(ALLOW_TEST_RUNNER_BYPASS_ENV),
            demo_mode: flag(DEMO_MODE_ENV),
            disabled: flag(BYPASS_DISABLED_ENV),
        };

        let defaults = RetryPolicy::for_environment(environment);
        let retry = RetryPolicy {
            max_attempts: parse_number(&lookup, MAX_ATTEMPTS_ENV)?
                .map(|n: u32| n.max(1))
                .unwrap_or(defaults.max_attempts),
            base_delay: parse_millis(&lookup, RETRY_BASE_DELAY_ENV)?
                .unwrap_or(defaults.base_delay),
            max_delay: parse_millis(&lookup, RETRY_MAX_DELAY_ENV)?.unwrap_or(defaults.max_delay),
        };

        let identity = IdentityServiceConfig {
            base_url: lookup(IDENTITY_SERVICE_URL_ENV)
                .unwrap_or_else(|| DEFAULT_IDENTITY_SERVICE_URL.to_string()),
            service_id: lookup(IDENTITY_SERVICE_ID_ENV).filter(|v| !v.is_empty()),
            service_secret: lookup(IDENTITY_SERVICE_SECRET_ENV).filter(|v| !v.is_empty()),
            request_timeout: parse_millis(&lookup, IDENTITY_REQUEST_TIMEOUT_ENV)?
                .unwrap_or(DEFAULT_IDENTITY_REQUEST_TIMEOUT),
            circuit_failure_threshold: parse_number(&lookup, CIRCUIT_FAILURE_THRESHOLD_ENV)?
                .map(|n: u32| n.max(1))
                .unwrap_or(DEFAULT_CIRCUIT_FAILURE_THRESHOLD),
            circuit_recovery_timeout: parse_millis(&lookup, CIRCUIT_RECOVERY_TIMEOUT_ENV)?
                .unwrap_or(DEFAULT_CIRCUIT_RECOVERY_TIMEOUT),
        };
        url::Url::parse(&identity.base_url).map_err(|e| ConfigError::InvalidValue {
            name: IDENTITY_SERVICE_URL_ENV,
            reason: e.to_string(),
        })?;

        let tls = match (lookup(TLS_CERT_PATH_ENV), lookup(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some((PathBuf::from(cert), PathBuf::from(key))),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteTls),
        };

        let server = ServerConfig {
            host: lookup(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_number(&lookup, PORT_ENV)?.unwrap_or(DEFAULT_PORT),
            tls,
        };

        Ok(Self {
            environment,
            bypass,
            retry,
            handshake_timeout: parse_millis(&lookup, HANDSHAKE_TIMEOUT_ENV)?
                .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT),
            identity,
            server,
        })
    }
}

/// Boolean flags accept `1`, `true`, `yes` and `on`.
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_number<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                name,
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn parse_millis<F>(lookup: &F, name: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_number::<F, u64>(lookup, name)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<GatewayConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn unset_environment_is_production() {
        let config = load(&[]).unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.retry, RetryPolicy::for_environment(Environment::Production));
    }

    #[test]
    fn unknown_environment_fails_closed() {
        let config = load(&[("ENVIRONMENT", "qa-cluster")]).unwrap();
        assert!(config.environment.is_production());
    }

    #[test]
    fn environment_aliases_parse() {
        assert_eq!(Environment::parse("PROD"), Some(Environment::Production));
        assert_eq!(Environment::parse("stage"), Some(Environment::Staging));
        assert_eq!(Environment::parse("development"), Some(Environment::Local));
        assert_eq!(Environment::parse("testing"), Some(Environment::Test));
        assert_eq!(Environment::parse(""), None);
    }

    #[test]
    fn staging_retries_more_than_production() {
        let staging = RetryPolicy::for_environment(Environment::Staging);
        let production = RetryPolicy::for_environment(Environment::Production);
        let local = RetryPolicy::for_environment(Environment::Local);
        assert!(staging.max_attempts > production.max_attempts);
        assert!(production.max_attempts > local.max_attempts);
        assert!(staging.max_delay > production.max_delay);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(64), Duration::from_millis(500));
    }

    #[test]
    fn bypass_flags_are_read() {
        let config = load(&[
            ("ENVIRONMENT", "staging"),
            ("E2E_TESTING", "1"),
            ("DEMO_MODE", "true"),
            ("PYTEST_RUNNING", "1"),
        ])
        .unwrap();
        assert!(config.bypass.e2e_testing);
        assert!(config.bypass.demo_mode);
        assert!(config.bypass.test_runner);
        assert!(!config.bypass.allow_test_runner_bypass);
        assert!(!config.bypass.staging_e2e_test);
    }

    #[test]
    fn test_runner_needs_allow_flag() {
        let mut signals = BypassSignals {
            test_runner: true,
            ..Default::default()
        };
        assert!(signals.active().is_empty());
        signals.allow_test_runner_bypass = true;
        assert_eq!(signals.active(), vec![PYTEST_RUNNING_ENV]);
    }

    #[test]
    fn retry_overrides_apply() {
        let config = load(&[
            ("ENVIRONMENT", "local"),
            ("AUTH_MAX_ATTEMPTS", "4"),
            ("AUTH_RETRY_BASE_DELAY_MS", "10"),
            ("AUTH_RETRY_MAX_DELAY_MS", "40"),
        ])
        .unwrap();
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay, Duration::from_millis(10));
        assert_eq!(config.retry.max_delay, Duration::from_millis(40));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let config = load(&[("AUTH_MAX_ATTEMPTS", "0")]).unwrap();
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn invalid_number_is_an_error() {
        let err = load(&[("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "PORT", .. }));
    }

    #[test]
    fn invalid_identity_url_is_an_error() {
        let err = load(&[("IDENTITY_SERVICE_URL", "not a url")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "IDENTITY_SERVICE_URL",
                ..
            }
        ));
    }

    #[test]
    fn tls_requires_both_paths() {
        let err = load(&[("TLS_CERT_PATH", "/etc/cert.pem")]).unwrap_err();
        assert!(matches!(err, ConfigError::IncompleteTls));

        let config = load(&[
            ("TLS_CERT_PATH", "/etc/cert.pem"),
            ("TLS_KEY_PATH", "/etc/key.pem"),
        ])
        .unwrap();
        assert!(config.server.tls.is_some());
    }
}
