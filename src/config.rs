use std::env;

use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub driver_id: Uuid,
    pub trip_api_url: Option<String>,
    pub event_queue_size: usize,
    pub event_buffer_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        // An ephemeral id is fine for local runs; real devices set DRIVER_ID.
        let driver_id = match env::var("DRIVER_ID") {
            Ok(raw) => raw
                .parse::<Uuid>()
                .map_err(|err| AppError::Internal(format!("invalid DRIVER_ID: {err}")))?,
            Err(_) => Uuid::new_v4(),
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            driver_id,
            trip_api_url: env::var("TRIP_API_URL").ok(),
            event_queue_size: parse_or_default("EVENT_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
