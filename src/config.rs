#![allow(dead_code)]

use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub trusted_hosts: Vec<String>,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub jwt_secret: Option<String>,
    pub jwt_ttl_days: i64,
    pub session_cookie_name: String,
    pub session_cookie_secure: bool,
    pub admin_emails: Vec<String>,
    pub overview_cache_ttl_seconds: u64,
    pub overview_cache_max_entries: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "PGNest API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/api")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 5000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:5173")),
            trusted_hosts: parse_csv(&env_or("TRUSTED_HOSTS", "localhost,127.0.0.1")),
            rate_limit_enabled: env_parse_bool_or("RATE_LIMIT_ENABLED", true),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            jwt_secret: env_opt("JWT_SECRET"),
            jwt_ttl_days: env_parse_or("JWT_TTL_DAYS", 7),
            session_cookie_name: env_or("SESSION_COOKIE_NAME", "token"),
            session_cookie_secure: env_parse_bool_or("SESSION_COOKIE_SECURE", false),
            admin_emails: parse_csv(&env_or("ADMIN_EMAILS", "")),
            overview_cache_ttl_seconds: env_parse_or("OVERVIEW_CACHE_TTL_SECONDS", 10),
            overview_cache_max_entries: env_parse_or("OVERVIEW_CACHE_MAX_ENTRIES", 16),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    /// Secure cookies are forced on in production no matter what the env says.
    pub fn session_cookie_secure_runtime(&self) -> bool {
        if self.is_production() {
            return true;
        }
        self.session_cookie_secure
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        let candidate = email.trim();
        self.admin_emails
            .iter()
            .any(|entry| entry.eq_ignore_ascii_case(candidate))
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/api".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::{normalize_prefix, parse_csv, AppConfig};

    fn config_with_admins(raw: &str) -> AppConfig {
        let mut config = AppConfig::from_env();
        config.admin_emails = parse_csv(raw);
        config
    }

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("api"), "/api");
        assert_eq!(normalize_prefix("/api/"), "/api");
        assert_eq!(normalize_prefix(""), "/api");
    }

    #[test]
    fn parses_csv_ignoring_blanks() {
        assert_eq!(parse_csv("a, b,,c "), vec!["a", "b", "c"]);
        assert!(parse_csv("").is_empty());
    }

    #[test]
    fn matches_admin_emails_case_insensitively() {
        let config = config_with_admins("owner@pgnest.in, OPS@pgnest.in");
        assert!(config.is_admin_email("Owner@PGNest.in"));
        assert!(config.is_admin_email(" ops@pgnest.in "));
        assert!(!config.is_admin_email("tenant@pgnest.in"));
    }
}
