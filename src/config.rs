use std::env;

/// Runtime configuration, loaded once at startup from the environment
/// (with `.env` support via dotenvy). `SESSION_KEY` has no default on
/// purpose: a predictable signing key would make every session forgeable.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_key: String,
    pub cache_dir: String,
    pub seed_admin_password: String,
    pub seed_manager_password: String,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://bugs.db?mode=rwc".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            session_key: env::var("SESSION_KEY").expect("SESSION_KEY must be set in .env"),
            cache_dir: env::var("CACHE_DIR").unwrap_or_else(|_| "cache".to_string()),
            seed_admin_password: env::var("SEED_ADMIN_PASSWORD")
                .unwrap_or_else(|_| "admin".to_string()),
            seed_manager_password: env::var("SEED_MANAGER_PASSWORD")
                .unwrap_or_else(|_| "manager".to_string()),
        }
    }
}
