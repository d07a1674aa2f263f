use std::env;

use fieldops_access::UserId;
use fieldops_settings::Thresholds;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Process-start snapshot of the environment. Deliberately hand-rolled
/// (no `config`/`envy` crate) — the surface is small and fixed, and every
/// field maps one-to-one onto a documented environment variable.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub database_url: Option<String>,
    pub db_schema: Option<String>,
    pub requests_chat_id: Option<String>,
    pub events_chat_id: Option<String>,
    pub backup_chat_id: Option<String>,
    pub backup_path: Option<String>,
    pub finance_export_chat_id: Option<String>,
    pub super_admin: Option<UserId>,
    pub sys_admin_ids: Vec<UserId>,
    pub webhook_secret: Option<String>,
    pub webhook_port: u16,
    pub public_base_url: Option<String>,
    pub close_photo_limit: usize,
    pub default_thresholds: Thresholds,
}

const DEFAULT_WEBHOOK_PORT: u16 = 8080;
const DEFAULT_CLOSE_PHOTO_LIMIT: usize = 5;

impl RuntimeConfig {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let super_admin = match lookup("SUPER_ADMIN") {
            Some(raw) => Some(parse_user_id("SUPER_ADMIN", &raw)?),
            None => None,
        };
        let sys_admin_ids = match lookup("SYS_ADMIN_IDS") {
            Some(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| parse_user_id("SYS_ADMIN_IDS", part))
                .collect::<ConfigResult<Vec<_>>>()?,
            _ => Vec::new(),
        };
        let webhook_port = match lookup("WEBHOOK_PORT") {
            Some(raw) => parse_u16("WEBHOOK_PORT", &raw)?,
            None => DEFAULT_WEBHOOK_PORT,
        };
        let close_photo_limit = match lookup("CLOSE_PHOTO_LIMIT") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| ConfigError::Invalid {
                    name: "CLOSE_PHOTO_LIMIT",
                    value: raw.clone(),
                })?,
            None => DEFAULT_CLOSE_PHOTO_LIMIT,
        };
        let large_expense_minor = match lookup("LARGE_EXPENSE_MINOR") {
            Some(raw) => raw.parse::<i64>().map_err(|_| ConfigError::Invalid {
                name: "LARGE_EXPENSE_MINOR",
                value: raw.clone(),
            })?,
            None => Thresholds::default().large_expense_minor,
        };
        let transfer_pending_days = match lookup("TRANSFER_PENDING_DAYS") {
            Some(raw) => raw.parse::<u32>().map_err(|_| ConfigError::Invalid {
                name: "TRANSFER_PENDING_DAYS",
                value: raw.clone(),
            })?,
            None => Thresholds::default().transfer_pending_days,
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL"),
            db_schema: lookup("DB_SCHEMA"),
            requests_chat_id: lookup("REQUESTS_CHAT_ID"),
            events_chat_id: lookup("EVENTS_CHAT_ID"),
            backup_chat_id: lookup("BACKUP_CHAT_ID"),
            backup_path: lookup("BACKUP_PATH"),
            finance_export_chat_id: lookup("FINANCE_EXPORT_CHAT_ID"),
            super_admin,
            sys_admin_ids,
            webhook_secret: lookup("WEBHOOK_SECRET"),
            webhook_port,
            public_base_url: lookup("PUBLIC_BASE_URL"),
            close_photo_limit,
            default_thresholds: Thresholds {
                large_expense_minor,
                transfer_pending_days,
            },
        })
    }
}

fn parse_user_id(name: &'static str, raw: &str) -> ConfigResult<UserId> {
    raw.parse::<UserId>().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}

fn parse_u16(name: &'static str, raw: &str) -> ConfigResult<u16> {
    raw.parse::<u16>().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}
