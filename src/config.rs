use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use tracing::{info, warn};

pub struct Config {
    pub port: u16,
    pub redis_url: String,
    /// Signing credential for bearer tokens. Privileged code paths cannot
    /// run without it, so a missing secret is fatal at startup.
    pub auth_secret: String,
    /// Uid granted an admin marker on first startup when the admin
    /// collection is empty.
    pub bootstrap_admin: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("RUST_PORT", "1111"),
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379"),
            auth_secret: load_secret("AUTH_SECRET"),
            bootstrap_admin: env::var("BOOTSTRAP_ADMIN").ok(),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

/// Docker secret file first, environment variable second.
fn load_secret(secret_name: &str) -> String {
    let path = format!("/run/secrets/{secret_name}");

    if let Ok(value) = read_to_string(&path) {
        return value.trim().to_string();
    }

    env::var(secret_name)
        .map_err(|e| {
            warn!("Failed to read {secret_name} from file or environment: {e}");
        })
        .expect("Secrets misconfigured!")
}
