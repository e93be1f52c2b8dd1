use std::net::IpAddr;

use ipnet::IpNet;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub host: IpAddr,
    pub port: u16,
    pub base_url: String,
    pub registration: RegistrationMode,
    pub max_upload_size: usize,
    pub password_min_length: usize,
    pub trusted_proxies: Vec<IpNet>,
    pub cors_origins: Vec<String>,
    pub log_level: String,
    pub smtp: Option<SmtpConfig>,
    pub s3: Option<S3Config>,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO, R2, Spaces).
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationMode {
    Open,
    Closed,
}

pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;
        let jwt_secret = env_required("JWT_SECRET")?;

        let host: IpAddr = env_or("PROJECTHUB_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid PROJECTHUB_HOST: {e}"))?;

        let port: u16 = env_or("PROJECTHUB_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid PROJECTHUB_PORT: {e}"))?;

        let base_url = env_or("PROJECTHUB_BASE_URL", &format!("http://{host}:{port}"));

        let registration = parse_registration(&env_or("PROJECTHUB_REGISTRATION", "open"));

        let max_upload_size: usize = env_or(
            "PROJECTHUB_MAX_UPLOAD_SIZE",
            &DEFAULT_MAX_UPLOAD_SIZE.to_string(),
        )
        .parse()
        .map_err(|e| format!("Invalid PROJECTHUB_MAX_UPLOAD_SIZE: {e}"))?;

        let password_min_length: usize = env_or("PROJECTHUB_PASSWORD_MIN_LENGTH", "8")
            .parse()
            .map_err(|e| format!("Invalid PROJECTHUB_PASSWORD_MIN_LENGTH: {e}"))?;

        let trusted_proxies = parse_proxies(&env_or("PROJECTHUB_TRUSTED_PROXIES", ""))?;

        let cors_origins = split_list(&env_or("PROJECTHUB_CORS_ORIGINS", ""));

        let log_level = env_or("PROJECTHUB_LOG_LEVEL", "info");

        let smtp = match (
            std::env::var("PROJECTHUB_SMTP_HOST").ok(),
            std::env::var("PROJECTHUB_SMTP_PORT").ok(),
            std::env::var("PROJECTHUB_SMTP_USER").ok(),
            std::env::var("PROJECTHUB_SMTP_PASS").ok(),
            std::env::var("PROJECTHUB_SMTP_FROM").ok(),
        ) {
            (Some(host), Some(port), Some(user), Some(pass), Some(from)) => Some(SmtpConfig {
                host,
                port: port
                    .parse()
                    .map_err(|e| format!("Invalid PROJECTHUB_SMTP_PORT: {e}"))?,
                user,
                pass,
                from,
            }),
            _ => None,
        };

        let s3 = std::env::var("PROJECTHUB_S3_BUCKET")
            .ok()
            .filter(|b| !b.trim().is_empty())
            .map(|bucket| S3Config {
                bucket,
                region: std::env::var("PROJECTHUB_S3_REGION").ok(),
                endpoint: std::env::var("PROJECTHUB_S3_ENDPOINT").ok(),
            });

        Ok(Config {
            database_url,
            jwt_secret,
            host,
            port,
            base_url,
            registration,
            max_upload_size,
            password_min_length,
            trusted_proxies,
            cors_origins,
            log_level,
            smtp,
            s3,
        })
    }
}

fn parse_registration(value: &str) -> RegistrationMode {
    match value {
        "closed" => RegistrationMode::Closed,
        _ => RegistrationMode::Open,
    }
}

fn parse_proxies(value: &str) -> Result<Vec<IpNet>, String> {
    split_list(value)
        .into_iter()
        .map(|s| {
            s.parse()
                .map_err(|e| format!("Invalid PROJECTHUB_TRUSTED_PROXIES entry '{s}': {e}"))
        })
        .collect()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
