use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// When unset, sheets live in the in-memory store only.
    pub redis_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("STARDECK_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            redis_url: env::var("REDIS_URL").ok(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            redis_url: None,
        }
    }
}
