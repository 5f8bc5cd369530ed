use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::kernel::DEFAULT_PRINTER_TIMEOUT;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub whatsapp_access_token: String,
    pub whatsapp_phone_number_id: String,
    /// Fallback when `webhook.verify_token` is not in the settings table.
    pub webhook_verify_token: Option<String>,
    /// Fallback when `webhook.app_secret` is not in the settings table.
    pub webhook_app_secret: Option<String>,
    /// Printer name to `host:port`.
    pub printers: HashMap<String, String>,
    pub printer_timeout: Duration,
    pub media_dir: PathBuf,
    pub job_concurrency: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            whatsapp_access_token: env::var("WHATSAPP_ACCESS_TOKEN")
                .context("WHATSAPP_ACCESS_TOKEN must be set")?,
            whatsapp_phone_number_id: env::var("WHATSAPP_PHONE_NUMBER_ID")
                .context("WHATSAPP_PHONE_NUMBER_ID must be set")?,
            webhook_verify_token: env::var("WEBHOOK_VERIFY_TOKEN").ok(),
            webhook_app_secret: env::var("WEBHOOK_APP_SECRET").ok(),
            printers: parse_printers(&env::var("PRINTERS").unwrap_or_default())
                .context("PRINTERS must look like name=host:port,name=host:port")?,
            printer_timeout: match env::var("PRINTER_TIMEOUT_SECONDS") {
                Ok(secs) => Duration::from_secs(
                    secs.parse()
                        .context("PRINTER_TIMEOUT_SECONDS must be a whole number")?,
                ),
                Err(_) => DEFAULT_PRINTER_TIMEOUT,
            },
            media_dir: env::var("MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("orderdesk-media")),
            job_concurrency: env::var("JOB_CONCURRENCY")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .context("JOB_CONCURRENCY must be a valid number")?,
        })
    }
}

/// Parse `cocina=10.0.0.20:9100,barra=10.0.0.21:9100`.
pub fn parse_printers(raw: &str) -> Result<HashMap<String, String>> {
    let mut printers = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((name, addr)) = entry.split_once('=') else {
            bail!("printer entry '{}' has no '='", entry);
        };
        let (name, addr) = (name.trim(), addr.trim());
        if name.is_empty() || !addr.contains(':') {
            bail!("printer entry '{}' must be name=host:port", entry);
        }
        printers.insert(name.to_string(), addr.to_string());
    }
    Ok(printers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_printer_list() {
        let printers = parse_printers(" cocina=10.0.0.20:9100, barra = 10.0.0.21:9100 ,").unwrap();
        assert_eq!(printers.len(), 2);
        assert_eq!(printers["barra"], "10.0.0.21:9100");
        assert!(parse_printers("").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_printer_entries() {
        assert!(parse_printers("cocina").is_err());
        assert!(parse_printers("cocina=10.0.0.20").is_err());
        assert!(parse_printers("=10.0.0.20:9100").is_err());
    }
}
