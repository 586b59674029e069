use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::SqlGatewayError;
use crate::types::Profile;

pub const ENV_PROFILE: &str = "SQL_GATEWAY_PROFILE";
pub const ENV_REMOTE_URL: &str = "SQL_GATEWAY_REMOTE_URL";
pub const ENV_AUTH_TOKEN: &str = "SQL_GATEWAY_AUTH_TOKEN";
pub const ENV_LOCAL_PATH: &str = "SQL_GATEWAY_LOCAL_PATH";
pub const ENV_POOL_SIZE: &str = "SQL_GATEWAY_POOL_SIZE";
pub const ENV_DEADLINE_MS: &str = "SQL_GATEWAY_DEADLINE_MS";
pub const ENV_AUDIT: &str = "SQL_GATEWAY_AUDIT";

const DEFAULT_POOL_SIZE: usize = 8;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote (libsql server / Turso) connection parameters.
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub url: String,
    pub auth_token: String,
}

/// Local file-backed database parameters.
#[derive(Debug, Clone)]
pub struct LocalOptions {
    pub path: String,
}

/// Connection parameters for one resolved profile.
#[derive(Debug, Clone)]
pub enum Target {
    Remote(RemoteOptions),
    Local(LocalOptions),
}

impl Target {
    #[must_use]
    pub fn profile(&self) -> Profile {
        match self {
            Target::Remote(_) => Profile::Remote,
            Target::Local(_) => Profile::Local,
        }
    }
}

/// Deadline and cancellation applied to one logical operation.
///
/// The deadline covers the whole operation (every statement plus commit); the token
/// lets the caller abort it from outside.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub deadline: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl ExecOptions {
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Configuration consumed by the connection factory and gateway.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Profile used when the caller does not pick one explicitly.
    pub profile: Option<Profile>,
    pub remote: Option<RemoteOptions>,
    pub local: Option<LocalOptions>,
    pub pool_size: usize,
    pub busy_timeout: Duration,
    pub audit_enabled: bool,
    pub exec: ExecOptions,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            profile: None,
            remote: None,
            local: None,
            pool_size: DEFAULT_POOL_SIZE,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            audit_enabled: true,
            exec: ExecOptions::default(),
        }
    }
}

impl DbConfig {
    #[must_use]
    pub fn builder() -> DbConfigBuilder {
        DbConfigBuilder::default()
    }

    /// Read the configuration from process environment variables.
    ///
    /// # Errors
    /// Returns `SqlGatewayError::ConfigError` for malformed values.
    pub fn from_env() -> Result<Self, SqlGatewayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary key lookup.
    ///
    /// Empty values count as unset. A remote profile is only recorded when both the
    /// URL and the auth token are present.
    ///
    /// # Errors
    /// Returns `SqlGatewayError::ConfigError` for malformed values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SqlGatewayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = DbConfig::default();

        if let Some(raw) = get(ENV_PROFILE) {
            let profile = raw
                .parse::<Profile>()
                .map_err(|e| SqlGatewayError::ConfigError(format!("{ENV_PROFILE}: {e}")))?;
            config.profile = Some(profile);
        }
        if let (Some(url), Some(auth_token)) = (get(ENV_REMOTE_URL), get(ENV_AUTH_TOKEN)) {
            config.remote = Some(RemoteOptions { url, auth_token });
        }
        if let Some(path) = get(ENV_LOCAL_PATH) {
            config.local = Some(LocalOptions { path });
        }
        if let Some(raw) = get(ENV_POOL_SIZE) {
            config.pool_size = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    SqlGatewayError::ConfigError(format!(
                        "{ENV_POOL_SIZE} must be a positive integer, got `{raw}`"
                    ))
                })?;
        }
        if let Some(raw) = get(ENV_DEADLINE_MS) {
            let millis = raw.trim().parse::<u64>().map_err(|_| {
                SqlGatewayError::ConfigError(format!(
                    "{ENV_DEADLINE_MS} must be milliseconds, got `{raw}`"
                ))
            })?;
            config.exec.deadline = Some(Duration::from_millis(millis));
        }
        if let Some(raw) = get(ENV_AUDIT) {
            config.audit_enabled = match raw.trim().to_ascii_lowercase().as_str() {
                "on" | "true" | "1" => true,
                "off" | "false" | "0" => false,
                other => {
                    return Err(SqlGatewayError::ConfigError(format!(
                        "{ENV_AUDIT} must be `on` or `off`, got `{other}`"
                    )));
                }
            };
        }
        Ok(config)
    }

    /// Resolve the connection target for `profile`, or for the configured default.
    ///
    /// The profile is never inferred from which parameters happen to be present,
    /// and a profile with missing parameters never falls back to the other one.
    ///
    /// # Errors
    /// Returns `SqlGatewayError::ConfigError` when no profile is selected or the
    /// selected profile lacks its parameters.
    pub fn resolve(&self, profile: Option<Profile>) -> Result<Target, SqlGatewayError> {
        let profile = profile.or(self.profile).ok_or_else(|| {
            SqlGatewayError::ConfigError(format!(
                "no database profile selected; pass one explicitly or set {ENV_PROFILE}"
            ))
        })?;
        match profile {
            Profile::Remote => self.remote.clone().map(Target::Remote).ok_or_else(|| {
                SqlGatewayError::ConfigError(format!(
                    "remote profile requires {ENV_REMOTE_URL} and {ENV_AUTH_TOKEN}"
                ))
            }),
            Profile::Local => self.local.clone().map(Target::Local).ok_or_else(|| {
                SqlGatewayError::ConfigError(format!("local profile requires {ENV_LOCAL_PATH}"))
            }),
        }
    }
}

/// Fluent builder for [`DbConfig`].
#[derive(Debug, Clone, Default)]
pub struct DbConfigBuilder {
    config: DbConfig,
}

impl DbConfigBuilder {
    #[must_use]
    pub fn profile(mut self, profile: Profile) -> Self {
        self.config.profile = Some(profile);
        self
    }

    #[must_use]
    pub fn remote(mut self, url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        self.config.remote = Some(RemoteOptions {
            url: url.into(),
            auth_token: auth_token.into(),
        });
        self
    }

    #[must_use]
    pub fn local(mut self, path: impl Into<String>) -> Self {
        self.config.local = Some(LocalOptions { path: path.into() });
        self
    }

    #[must_use]
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.config.pool_size = pool_size.max(1);
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.config.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn audit(mut self, enabled: bool) -> Self {
        self.config.audit_enabled = enabled;
        self
    }

    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config.exec.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn finish(self) -> DbConfig {
        self.config
    }
}
