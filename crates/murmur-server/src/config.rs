use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;

use murmur_api::TokenConfig;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "Y2hhbmdlLW1lLXRvLWEtcmFuZG9tLXN0cmluZw==",
];

const MIN_SECRET_BYTES: usize = 32;

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub tokens: TokenConfig,
    /// Unset means the in-process key-value store.
    pub redis_url: Option<String>,
    pub message_cache_ttl: Duration,
    pub recent_limit: usize,
    pub ingest_workers: usize,
    pub ingest_queue: usize,
    pub topic_capacity: usize,
    /// Existing users promoted to ADMIN at startup.
    pub admin_usernames: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let access_secret = secret(&get, "MURMUR_JWT_ACCESS_SECRET")?;
        let refresh_secret = secret(&get, "MURMUR_JWT_REFRESH_SECRET")?;
        if access_secret == refresh_secret {
            bail!("MURMUR_JWT_ACCESS_SECRET and MURMUR_JWT_REFRESH_SECRET must differ");
        }

        let access_minutes: i64 = parsed(&get, "MURMUR_ACCESS_VALIDITY_MINUTES", 15)?;
        let refresh_days: i64 = parsed(&get, "MURMUR_REFRESH_VALIDITY_DAYS", 30)?;
        if access_minutes <= 0 || refresh_days <= 0 {
            bail!("Token validity periods must be positive");
        }

        let ingest_workers: usize = parsed(&get, "MURMUR_INGEST_WORKERS", 4)?;
        if ingest_workers == 0 {
            bail!("MURMUR_INGEST_WORKERS must be at least 1");
        }

        Ok(Self {
            host: get("MURMUR_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&get, "MURMUR_PORT", 3000)?,
            db_path: get("MURMUR_DB_PATH").unwrap_or_else(|| "murmur.db".into()).into(),
            tokens: TokenConfig {
                access_secret,
                refresh_secret,
                access_validity: chrono::Duration::minutes(access_minutes),
                refresh_validity: chrono::Duration::days(refresh_days),
            },
            redis_url: get("MURMUR_REDIS_URL").filter(|url| !url.trim().is_empty()),
            message_cache_ttl: Duration::from_secs(parsed(&get, "MURMUR_MESSAGE_CACHE_TTL_SECS", 600)?),
            recent_limit: parsed(&get, "MURMUR_RECENT_LIMIT", 100)?,
            ingest_workers,
            ingest_queue: parsed(&get, "MURMUR_INGEST_QUEUE", 256)?,
            topic_capacity: parsed(&get, "MURMUR_TOPIC_CAPACITY", 1024)?,
            admin_usernames: get("MURMUR_ADMIN_USERS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

fn secret(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Vec<u8>> {
    let value = get(key).unwrap_or_default();
    let value = value.trim();
    if value.is_empty() || PLACEHOLDER_SECRETS.contains(&value) {
        bail!("{} is unset or still a placeholder", key);
    }

    let bytes = B64
        .decode(value)
        .with_context(|| format!("{} is not valid base64", key))?;
    if bytes.len() < MIN_SECRET_BYTES {
        bail!("{} must decode to at least {} bytes", key, MIN_SECRET_BYTES);
    }
    Ok(bytes)
}

fn parsed<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn b64(bytes: &[u8]) -> String {
        B64.encode(bytes)
    }

    fn load(vars: &[(&str, String)]) -> Result<Config> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    fn secrets() -> Vec<(&'static str, String)> {
        vec![
            ("MURMUR_JWT_ACCESS_SECRET", b64(&[1u8; 32])),
            ("MURMUR_JWT_REFRESH_SECRET", b64(&[2u8; 48])),
        ]
    }

    #[test]
    fn defaults_apply() {
        let config = load(&secrets()).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("murmur.db"));
        assert_eq!(config.tokens.access_validity, chrono::Duration::minutes(15));
        assert_eq!(config.tokens.refresh_validity, chrono::Duration::days(30));
        assert_eq!(config.message_cache_ttl, Duration::from_secs(600));
        assert_eq!(config.recent_limit, 100);
        assert_eq!(config.ingest_workers, 4);
        assert!(config.redis_url.is_none());
        assert!(config.admin_usernames.is_empty());
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = secrets();
        vars.push(("MURMUR_PORT", "8080".into()));
        vars.push(("MURMUR_INGEST_WORKERS", "8".into()));
        vars.push(("MURMUR_REDIS_URL", "redis://127.0.0.1/".into()));
        vars.push(("MURMUR_ADMIN_USERS", "root, ops ,".into()));

        let config = load(&vars).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.ingest_workers, 8);
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1/"));
        assert_eq!(config.admin_usernames, vec!["root", "ops"]);
    }

    #[test]
    fn weak_secrets_are_refused() {
        assert!(load(&[]).is_err());

        let short = vec![
            ("MURMUR_JWT_ACCESS_SECRET", b64(&[1u8; 16])),
            ("MURMUR_JWT_REFRESH_SECRET", b64(&[2u8; 32])),
        ];
        assert!(load(&short).is_err());

        let same = vec![
            ("MURMUR_JWT_ACCESS_SECRET", b64(&[1u8; 32])),
            ("MURMUR_JWT_REFRESH_SECRET", b64(&[1u8; 32])),
        ];
        assert!(load(&same).is_err());

        let placeholder = vec![
            ("MURMUR_JWT_ACCESS_SECRET", "dev-secret-change-me".to_string()),
            ("MURMUR_JWT_REFRESH_SECRET", b64(&[2u8; 32])),
        ];
        assert!(load(&placeholder).is_err());
    }

    #[test]
    fn bad_numbers_are_reported() {
        let mut vars = secrets();
        vars.push(("MURMUR_PORT", "eighty".into()));
        let err = load(&vars).err().unwrap();
        assert!(err.to_string().contains("MURMUR_PORT"));

        let mut vars = secrets();
        vars.push(("MURMUR_INGEST_WORKERS", "0".into()));
        assert!(load(&vars).is_err());
    }
}
