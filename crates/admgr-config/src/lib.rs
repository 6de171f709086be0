//! Layered YAML configuration for the admgr daemon.
//!
//! Files are merged in order (later files override earlier ones), the merged
//! object is canonicalized to stable JSON and hashed, and the result is
//! deserialized into the typed [`Config`]. The hash is logged at boot so a
//! running instance can always be tied back to the exact configuration it
//! started with.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

// ---------------------------------------------------------------------------
// Typed configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Reported to the accounting service as the debit `source`.
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub db: DbConf,
    pub accounting: AccountingConf,
    #[serde(default)]
    pub logger: LoggerConf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConf {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: String,
}

impl DbConf {
    /// Postgres connection URL. `ADMGR_DATABASE_URL` takes precedence when
    /// set (CI and tests inject the DSN directly).
    pub fn url(&self) -> String {
        if let Ok(url) = std::env::var(crate::ENV_DB_URL) {
            return url;
        }
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.name
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountingConf {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
}

impl AccountingConf {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggerConf {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggerConf {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub const ENV_DB_URL: &str = "ADMGR_DATABASE_URL";

fn default_instance_id() -> String {
    "admgr".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    10001
}
fn default_scheme() -> String {
    "http".to_string()
}
fn default_health_check_path() -> String {
    "ping".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Layered load
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    /// SHA-256 of the canonical merged JSON.
    pub config_hash: String,
}

/// Load + merge YAML files in order, then canonicalize, hash, and
/// deserialize. Later files override earlier files via deep-merge.
pub fn load(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    let config: Config =
        serde_json::from_value(merged).context("config does not match expected shape")?;

    Ok(LoadedConfig {
        config,
        config_hash: hash,
    })
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting
/// compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}
