use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use super::{ConfigError, is_plain_identifier};

/// PostgreSQL connection parameters.
///
/// Every client opens its own connection from these parameters; connections
/// are never shared between clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_dbname")]
    pub dbname: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// SSL mode.
    #[serde(default)]
    pub ssl_mode: PostgresSslMode,

    /// Schema to create and query the collection in. Placed ahead of
    /// `public` on the search path so extension types stay visible.
    #[serde(default)]
    pub schema: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: None,
            dbname: default_dbname(),
            connect_timeout_secs: default_connect_timeout(),
            ssl_mode: PostgresSslMode::default(),
            schema: None,
        }
    }
}

impl ConnectionConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Validation(
                "connection.host cannot be empty".into(),
            ));
        }
        if self.dbname.is_empty() {
            return Err(ConfigError::Validation(
                "connection.dbname cannot be empty".into(),
            ));
        }
        if let Some(schema) = &self.schema
            && !is_plain_identifier(schema)
        {
            return Err(ConfigError::Validation(format!(
                "connection.schema '{schema}' must be a plain identifier"
            )));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "connection.connect_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.dbname)
            .ssl_mode(self.ssl_mode.into())
            .application_name("vecbench");
        let options = match &self.schema {
            Some(schema) => options.options([("search_path", format!("{schema},public"))]),
            None => options,
        };
        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// PostgreSQL SSL mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostgresSslMode {
    /// No SSL.
    Disable,
    /// Try SSL, fall back to non-SSL.
    #[default]
    Prefer,
    /// Require SSL.
    Require,
    /// Require SSL and verify server certificate.
    VerifyCa,
    /// Require SSL and verify server certificate and hostname.
    VerifyFull,
}

impl From<PostgresSslMode> for PgSslMode {
    fn from(mode: PostgresSslMode) -> Self {
        match mode {
            PostgresSslMode::Disable => PgSslMode::Disable,
            PostgresSslMode::Prefer => PgSslMode::Prefer,
            PostgresSslMode::Require => PgSslMode::Require,
            PostgresSslMode::VerifyCa => PgSslMode::VerifyCa,
            PostgresSslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_dbname() -> String {
    "postgres".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}
