//! Boot-time configuration, resolved once from the environment (§6
//! "Environment controls") into a typed value that lives on `AppState` and
//! is never re-read per request.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::RelayError;

#[derive(Debug, Clone)]
pub struct ContactInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
}

impl ContactInfo {
    fn is_unset(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.phone.is_none() && self.website.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// `None` means the process generated a random secret at boot (see `auth::secret_or_random`).
    pub jwt_secret: Option<String>,
    pub admin_key: Option<String>,
    pub db_path: PathBuf,
    pub session_ttl: Duration,
    pub cleanup_interval: Duration,
    pub allowed_domains: AllowedDomains,
    pub usage_public: bool,
    pub free_apikey_active: bool,
    pub static_dir: Option<PathBuf>,
    pub contact: ContactInfo,
    pub revoked_key_ttl_days: i64,
    pub revoked_key_cleanup_interval: Duration,
    pub upstream_url: String,
}

#[derive(Debug, Clone)]
pub enum AllowedDomains {
    Any,
    List(Vec<String>),
}

impl AllowedDomains {
    pub fn allows(&self, domain: &str) -> bool {
        match self {
            AllowedDomains::Any => true,
            AllowedDomains::List(list) => list.iter().any(|d| d == domain),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, RelayError> {
        let port = env_or("PORT", "8080")
            .parse::<u16>()
            .map_err(|e| RelayError::Config(format!("invalid PORT: {e}")))?;

        let jwt_secret = std::env::var("JWT_SECRET").ok().filter(|s| !s.is_empty());
        let admin_key = std::env::var("ADMIN_KEY").ok().filter(|s| !s.is_empty());

        let db_path = PathBuf::from(env_or("DB_PATH", "./relay.db"));

        let session_ttl = Duration::from_millis(
            env_or("SESSION_TTL", "7200000")
                .parse()
                .map_err(|e| RelayError::Config(format!("invalid SESSION_TTL: {e}")))?,
        );
        let cleanup_interval = Duration::from_millis(
            env_or("CLEANUP_INTERVAL", "300000")
                .parse()
                .map_err(|e| RelayError::Config(format!("invalid CLEANUP_INTERVAL: {e}")))?,
        );

        let allowed_domains = match std::env::var("ALLOWED_DOMAINS").ok() {
            None => AllowedDomains::List(Vec::new()),
            Some(v) if v.trim() == "*" => AllowedDomains::Any,
            Some(v) => AllowedDomains::List(
                v.split(',')
                    .map(|s| s.trim().to_owned())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
        };

        let usage_public = env_flag("USAGE_PUBLIC");
        let free_apikey_active = env_flag("FREE_APIKEY_ACTIVE");
        let static_dir = std::env::var("STATIC_DIR").ok().map(PathBuf::from);

        let contact = ContactInfo {
            name: std::env::var("CONTACT_NAME").ok(),
            email: std::env::var("CONTACT_EMAIL").ok(),
            phone: std::env::var("CONTACT_PHONE").ok(),
            website: std::env::var("CONTACT_WEBSITE").ok(),
        };

        let revoked_key_ttl_days = env_or("REVOKED_KEY_TTL_DAYS", "30")
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid REVOKED_KEY_TTL_DAYS: {e}")))?;
        let revoked_key_cleanup_interval = Duration::from_millis(
            env_or("REVOKED_KEY_CLEANUP_INTERVAL", "86400000")
                .parse()
                .map_err(|e| {
                    RelayError::Config(format!("invalid REVOKED_KEY_CLEANUP_INTERVAL: {e}"))
                })?,
        );

        let upstream_url = std::env::var("UPSTREAM_URL")
            .map_err(|_| RelayError::Config("UPSTREAM_URL is required".to_owned()))?;
        let parsed = reqwest::Url::parse(&upstream_url)
            .map_err(|e| RelayError::Config(format!("invalid UPSTREAM_URL: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(RelayError::Config(format!(
                "unsupported scheme in UPSTREAM_URL: {upstream_url}"
            )));
        }

        Ok(Self {
            port,
            jwt_secret,
            admin_key,
            db_path,
            session_ttl,
            cleanup_interval,
            allowed_domains,
            usage_public,
            free_apikey_active,
            static_dir,
            contact,
            revoked_key_ttl_days,
            revoked_key_cleanup_interval,
            upstream_url,
        })
    }

    pub fn contact_response(&self) -> Option<relay_protocol::ContactResponse> {
        if self.contact.is_unset() {
            return None;
        }
        Some(relay_protocol::ContactResponse {
            name: self.contact.name.clone(),
            email: self.contact.email.clone(),
            phone: self.contact.phone.clone(),
            website: self.contact.website.clone(),
        })
    }

    /// Logs the non-secret configuration state, per spec §4.7.
    pub fn log_boot_state(&self) {
        tracing::info!(
            secret_present = self.jwt_secret.is_some(),
            admin_key_present = self.admin_key.is_some(),
            allowed_domains = ?self.allowed_domains,
            usage_public = self.usage_public,
            free_apikey_active = self.free_apikey_active,
            static_dir = ?self.static_dir,
            contact_configured = !self.contact.is_unset(),
            "relay configuration resolved"
        );
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key).is_ok_and(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_domains_any_matches_everything() {
        let any = AllowedDomains::Any;
        assert!(any.allows("https://anything.example"));
    }

    #[test]
    fn allowed_domains_list_matches_exact_entries_only() {
        let list = AllowedDomains::List(vec!["https://a.example".to_owned()]);
        assert!(list.allows("https://a.example"));
        assert!(!list.allows("https://b.example"));
    }
}
