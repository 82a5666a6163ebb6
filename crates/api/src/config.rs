//! Process configuration, read once at startup from the environment.
//!
//! A `.env` file (or `.env.<APP_ENV>`) is layered underneath the real
//! environment; variables already set are never overridden.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use gatekeeper_auth::{Role, RootAdmin};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_PG_PORT: &str = "5432";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },

    #[error("failed to read env file: {0}")]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl core::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// `None` selects the in-memory store.
    pub database: Option<DatabaseConfig>,
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
    pub model_path: Option<PathBuf>,
    pub root_admin: Option<RootAdmin>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = get("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                var: "BIND_ADDR",
                message: e.to_string(),
            })?;

        let max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw.parse::<u32>().ok().filter(|n| *n > 0).ok_or_else(|| {
                ConfigError::Invalid {
                    var: "DATABASE_MAX_CONNECTIONS",
                    message: format!("expected a positive integer, got '{raw}'"),
                }
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let database_url = get("DATABASE_URL").or_else(|| {
            let host = get("POSTGRES_HOST")?;
            let user = get("POSTGRES_USER").unwrap_or_else(|| "postgres".to_string());
            let password = get("POSTGRES_PASSWORD").unwrap_or_default();
            let port = get("POSTGRES_PORT").unwrap_or_else(|| DEFAULT_PG_PORT.to_string());
            let dbname = get("POSTGRES_DBNAME").unwrap_or_else(|| user.clone());
            Some(format!("postgres://{user}:{password}@{host}:{port}/{dbname}"))
        });

        let private_key_path = get("JWT_PRIVATE_KEY_PATH")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("JWT_PRIVATE_KEY_PATH"))?;
        let public_key_path = get("JWT_PUBLIC_KEY_PATH")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("JWT_PUBLIC_KEY_PATH"))?;

        let root_admin = match (get("ROOT_ADMIN_USERNAME"), get("ROOT_ADMIN_PASSWORD")) {
            (Some(username), Some(password)) => Some(RootAdmin {
                username,
                email: get("ROOT_ADMIN_EMAIL"),
                password,
                role: get("ROOT_ADMIN_ROLE").unwrap_or_else(|| Role::ADMIN.to_string()),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("ROOT_ADMIN_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Missing("ROOT_ADMIN_USERNAME")),
        };

        Ok(Self {
            bind_addr,
            database: database_url.map(|url| DatabaseConfig {
                url,
                max_connections,
            }),
            private_key_path,
            public_key_path,
            model_path: get("RBAC_MODEL_PATH").map(PathBuf::from),
            root_admin,
        })
    }
}

/// Load `.env`, or `.env.<APP_ENV>` when `APP_ENV` is set. A missing file is
/// not an error; returns the path that was loaded.
pub fn load_env_file() -> Result<Option<PathBuf>, ConfigError> {
    let file = match std::env::var("APP_ENV") {
        Ok(env) if !env.trim().is_empty() => format!(".env.{}", env.trim()),
        _ => ".env".to_string(),
    };
    match dotenvy::from_filename(&file) {
        Ok(path) => Ok(Some(path)),
        Err(dotenvy::Error::Io(_)) => Ok(None),
        Err(err) => Err(ConfigError::EnvFile(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let mut env: HashMap<String, String> = HashMap::from([
            ("JWT_PRIVATE_KEY_PATH".to_string(), "keys/private.pem".to_string()),
            ("JWT_PUBLIC_KEY_PATH".to_string(), "keys/public.pem".to_string()),
        ]);
        for (k, v) in vars {
            env.insert(k.to_string(), v.to_string());
        }
        Config::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_select_memory_store() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert!(cfg.database.is_none());
        assert!(cfg.root_admin.is_none());
        assert!(cfg.model_path.is_none());
    }

    #[test]
    fn postgres_parts_compose_a_url() {
        let cfg = config(&[
            ("POSTGRES_HOST", "db"),
            ("POSTGRES_USER", "app"),
            ("POSTGRES_PASSWORD", "pw"),
            ("POSTGRES_DBNAME", "admin"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
        ])
        .unwrap();
        let db = cfg.database.unwrap();
        assert_eq!(db.url, "postgres://app:pw@db:5432/admin");
        assert_eq!(db.max_connections, 12);
    }

    #[test]
    fn database_url_wins_over_parts() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://x@y/z"),
            ("POSTGRES_HOST", "db"),
        ])
        .unwrap();
        assert_eq!(cfg.database.unwrap().url, "postgres://x@y/z");
    }

    #[test]
    fn key_paths_are_required() {
        let err = Config::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("JWT_PRIVATE_KEY_PATH")));
    }

    #[test]
    fn root_admin_role_defaults_to_admin() {
        let cfg = config(&[("ROOT_ADMIN_USERNAME", "root"), ("ROOT_ADMIN_PASSWORD", "pw")]).unwrap();
        let root = cfg.root_admin.unwrap();
        assert_eq!(root.role, "admin");
        assert_eq!(root.email, None);
    }

    #[test]
    fn half_configured_root_admin_is_rejected() {
        let err = config(&[("ROOT_ADMIN_USERNAME", "root")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ROOT_ADMIN_PASSWORD")));
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = config(&[("DATABASE_MAX_CONNECTIONS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "DATABASE_MAX_CONNECTIONS", .. }));
        let err = config(&[("BIND_ADDR", "nope")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "BIND_ADDR", .. }));
    }
}
