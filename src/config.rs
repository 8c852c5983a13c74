use std::env;

use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub calendar: CalendarConfig,
    pub import: ImportConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,
    /// Lower-cased emails allowed to use the calendar. Read from `AUTH_ALLOWED_EMAILS`
    /// (comma separated). An empty list authorizes nobody.
    pub allowed_emails: Vec<String>,
    /// bcrypt hash of the team access code exchanged for a session token.
    pub access_code_hash: String,
}

impl AuthConfig {
    pub fn is_allowed(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        !email.is_empty() && self.allowed_emails.iter().any(|e| *e == email)
    }
}

#[derive(Debug, Clone)]
pub struct CalendarConfig {
    /// Zone whose calendar days define `dateStart` and range boundaries.
    pub timezone: Tz,
    /// Category ids offered by the UI dropdown.
    pub categories: Vec<String>,
    /// Team members offered for `assignedTo`.
    pub roster: Vec<String>,
    /// Longest window (in days) a range listing may request.
    pub max_range_days: i64,
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Maximum number of fingerprints per bulk lookup query.
    pub lookup_chunk_size: usize,
    /// Largest batch accepted by a single import request.
    pub max_rows: usize,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for auth endpoints
    pub auth_per_second: u32,
    /// Burst size for auth endpoints
    pub auth_burst: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let timezone_name = env::var("CALENDAR_TIMEZONE").unwrap_or_else(|_| "UTC".to_string());
        let timezone = timezone_name
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidValue("CALENDAR_TIMEZONE".to_string()))?;

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/calendar.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            auth: AuthConfig {
                jwt_secret: env::var("JWT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("JWT_SECRET".to_string()))?,
                jwt_expiration_hours: env::var("JWT_EXPIRATION_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()
                    .unwrap_or(24),
                allowed_emails: parse_list(&env::var("AUTH_ALLOWED_EMAILS").unwrap_or_default())
                    .into_iter()
                    .map(|e| e.to_lowercase())
                    .collect(),
                access_code_hash: env::var("AUTH_ACCESS_CODE_HASH")
                    .map_err(|_| ConfigError::MissingEnv("AUTH_ACCESS_CODE_HASH".to_string()))?,
            },
            calendar: CalendarConfig {
                timezone,
                categories: parse_list(
                    &env::var("CALENDAR_CATEGORIES")
                        .unwrap_or_else(|_| "meeting,deadline,task,other".to_string()),
                ),
                roster: parse_list(&env::var("CALENDAR_ROSTER").unwrap_or_default()),
                max_range_days: env::var("CALENDAR_MAX_RANGE_DAYS")
                    .unwrap_or_else(|_| "62".to_string())
                    .parse()
                    .unwrap_or(62),
            },
            import: ImportConfig {
                lookup_chunk_size: env::var("IMPORT_LOOKUP_CHUNK_SIZE")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse::<usize>()
                    .map_err(|_| ConfigError::InvalidValue("IMPORT_LOOKUP_CHUNK_SIZE".to_string()))
                    .and_then(|n| {
                        if n == 0 {
                            Err(ConfigError::InvalidValue(
                                "IMPORT_LOOKUP_CHUNK_SIZE".to_string(),
                            ))
                        } else {
                            Ok(n)
                        }
                    })?,
                max_rows: env::var("IMPORT_MAX_ROWS")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()
                    .unwrap_or(5000),
            },
            rate_limit: RateLimitConfig {
                auth_per_second: env::var("RATE_LIMIT_AUTH_PER_SECOND")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .unwrap_or(3),
                auth_burst: env::var("RATE_LIMIT_AUTH_BURST")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
        })
    }
}

/// Split a comma separated list, dropping blanks.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/calendar.db".to_string(),
                max_connections: 5,
            },
            auth: AuthConfig {
                jwt_secret: String::new(),
                jwt_expiration_hours: 24,
                allowed_emails: Vec::new(),
                access_code_hash: String::new(),
            },
            calendar: CalendarConfig {
                timezone: Tz::UTC,
                categories: vec![
                    "meeting".to_string(),
                    "deadline".to_string(),
                    "task".to_string(),
                    "other".to_string(),
                ],
                roster: Vec::new(),
                max_range_days: 62,
            },
            import: ImportConfig {
                lookup_chunk_size: 10,
                max_rows: 5000,
            },
            rate_limit: RateLimitConfig {
                auth_per_second: 3,
                auth_burst: 10,
            },
        }
    }
}
