//! Where a `SurrealRecordStore` keeps its records

use std::path::PathBuf;

/// Namespace holding `om_records` unless overridden
pub const DEFAULT_NAMESPACE: &str = "obsmem";
/// Database holding `om_records` unless overridden
pub const DEFAULT_DATABASE: &str = "main";
/// Directory for embedded persistence when nothing else is configured
pub const DEFAULT_LOCAL_PATH: &str = ".obsmem/db";

/// Signin level for remote credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLevel {
    Root,
    Database,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub level: AuthLevel,
}

/// Backend location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    /// Process-local, lost on drop
    Memory,
    /// Embedded surrealkv files; the directory is created on connect
    Local(PathBuf),
    /// Any SurrealDB URL, optionally signed in
    Remote {
        url: String,
        credentials: Option<Credentials>,
    },
}

impl StoreTarget {
    /// URL handed to `surrealdb::engine::any::connect`
    pub fn url(&self) -> String {
        match self {
            StoreTarget::Memory => "mem://".to_string(),
            StoreTarget::Local(path) => format!("surrealkv://{}", path.display()),
            StoreTarget::Remote { url, .. } => url.clone(),
        }
    }
}

/// Connection settings for the SurrealDB record store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub target: StoreTarget,
    pub namespace: String,
    pub database: String,
}

impl StoreConfig {
    fn with_target(target: StoreTarget) -> Self {
        Self {
            target,
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
        }
    }

    pub fn memory() -> Self {
        Self::with_target(StoreTarget::Memory)
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::with_target(StoreTarget::Local(path.into()))
    }

    /// Any URL the SurrealDB `any` engine accepts. `mem://` and
    /// `surrealkv://` URLs map to their dedicated targets.
    pub fn url(url: impl Into<String>) -> Self {
        let url = url.into();
        if url == "mem://" || url == "memory" {
            return Self::memory();
        }
        if let Some(path) = url.strip_prefix("surrealkv://") {
            return Self::local(path);
        }
        Self::with_target(StoreTarget::Remote {
            url,
            credentials: None,
        })
    }

    /// Remote endpoint with a signin
    pub fn remote(url: impl Into<String>, credentials: Credentials) -> Self {
        Self::with_target(StoreTarget::Remote {
            url: url.into(),
            credentials: Some(credentials),
        })
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Resolve from environment variables.
    ///
    /// Target, first match wins:
    /// - SURREALDB_ENDPOINT + SURREALDB_USERNAME + SURREALDB_PASSWORD
    ///   (SURREALDB_ROOT=true signs in as root)
    /// - SURREALDB_URL
    /// - embedded files under `.obsmem/db`
    ///
    /// SURREALDB_NAMESPACE and SURREALDB_DATABASE apply to every target.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let remote = lookup("SURREALDB_ENDPOINT").and_then(|endpoint| {
            let username = lookup("SURREALDB_USERNAME")?;
            let password = lookup("SURREALDB_PASSWORD")?;
            let level = match lookup("SURREALDB_ROOT") {
                Some(v) if v.eq_ignore_ascii_case("true") => AuthLevel::Root,
                _ => AuthLevel::Database,
            };
            Some(Self::remote(
                endpoint,
                Credentials {
                    username,
                    password,
                    level,
                },
            ))
        });

        let mut cfg = remote
            .or_else(|| lookup("SURREALDB_URL").map(Self::url))
            .unwrap_or_else(|| Self::local(DEFAULT_LOCAL_PATH));
        if let Some(ns) = lookup("SURREALDB_NAMESPACE") {
            cfg.namespace = ns;
        }
        if let Some(db) = lookup("SURREALDB_DATABASE") {
            cfg.database = db;
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_empty_env_uses_local_files() {
        let cfg = StoreConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg.target, StoreTarget::Local(PathBuf::from(DEFAULT_LOCAL_PATH)));
        assert_eq!(cfg.target.url(), "surrealkv://.obsmem/db");
        assert_eq!(cfg.namespace, "obsmem");
        assert_eq!(cfg.database, "main");
    }

    #[test]
    fn test_endpoint_with_credentials_wins_over_url() {
        let cfg = StoreConfig::from_lookup(lookup(&[
            ("SURREALDB_ENDPOINT", "wss://db.example"),
            ("SURREALDB_USERNAME", "svc"),
            ("SURREALDB_PASSWORD", "pw"),
            ("SURREALDB_ROOT", "TRUE"),
            ("SURREALDB_URL", "ws://ignored:8000"),
        ]));
        let StoreTarget::Remote { url, credentials } = cfg.target else {
            panic!("expected remote target");
        };
        assert_eq!(url, "wss://db.example");
        let credentials = credentials.unwrap();
        assert_eq!(credentials.username, "svc");
        assert_eq!(credentials.level, AuthLevel::Root);
    }

    #[test]
    fn test_partial_credentials_fall_through_to_url() {
        let cfg = StoreConfig::from_lookup(lookup(&[
            ("SURREALDB_ENDPOINT", "wss://db.example"),
            ("SURREALDB_USERNAME", "svc"),
            ("SURREALDB_URL", "ws://localhost:8000"),
            ("SURREALDB_NAMESPACE", "tenant-a"),
        ]));
        assert_eq!(
            cfg.target,
            StoreTarget::Remote {
                url: "ws://localhost:8000".to_string(),
                credentials: None,
            }
        );
        assert_eq!(cfg.namespace, "tenant-a");
        assert_eq!(cfg.database, "main");
    }

    #[test]
    fn test_url_maps_embedded_schemes() {
        assert_eq!(StoreConfig::url("mem://").target, StoreTarget::Memory);
        assert_eq!(
            StoreConfig::url("surrealkv:///tmp/om").target,
            StoreTarget::Local(PathBuf::from("/tmp/om"))
        );
        assert_eq!(StoreConfig::url("surrealkv:///tmp/om").target.url(), "surrealkv:///tmp/om");
    }
}
