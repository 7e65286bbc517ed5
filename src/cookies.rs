//! Session cookies for the primary search source.
//!
//! Scholar is far less likely to serve a CAPTCHA to a session that carries
//! cookies from a real browser visit. Cookies are exported from the browser,
//! imported once with `litscout cookies import`, and attached to every
//! Scholar request.

use crate::error::{LitscoutError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default cookie file path: `~/.litscout_cookies.json`
fn default_cookie_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".litscout_cookies.json"))
        .ok_or_else(|| LitscoutError::Config("Cannot determine home directory".to_string()))
}

/// Cookie entry in the browser-export JSON format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, alias = "httpOnly")]
    pub http_only: bool,
    #[serde(default, alias = "expirationDate")]
    pub expires: Option<f64>,
}

/// Persistent cookie jar on disk.
#[derive(Debug, Clone)]
pub struct CookieStore {
    path: PathBuf,
}

impl CookieStore {
    /// Store at the default location.
    pub fn new() -> Result<Self> {
        Ok(Self {
            path: default_cookie_path()?,
        })
    }

    /// Store at a custom location.
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load cookies; a missing or unreadable file yields an empty list.
    pub fn load(&self) -> Vec<Cookie> {
        if !self.path.exists() {
            debug!(path = ?self.path, "Cookie file not found");
            return Vec::new();
        }

        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "Failed to read cookie file");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<Cookie>>(&content) {
            Ok(cookies) => {
                info!(count = cookies.len(), path = ?self.path, "Loaded cookies");
                cookies
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse cookie file");
                Vec::new()
            }
        }
    }

    /// Parse a browser export and persist it, replacing what was stored.
    pub fn import_json(&self, json: &str) -> Result<usize> {
        let cookies: Vec<Cookie> = serde_json::from_str(json)?;
        if cookies.is_empty() {
            return Err(LitscoutError::Validation(
                "Cookie export contains no cookies".to_string(),
            ));
        }
        self.save(&cookies)?;
        Ok(cookies.len())
    }

    /// Save cookies to file.
    pub fn save(&self, cookies: &[Cookie]) -> Result<()> {
        let content = serde_json::to_string_pretty(cookies)?;
        std::fs::write(&self.path, content)?;
        info!(count = cookies.len(), path = ?self.path, "Saved cookies");
        Ok(())
    }

    /// Remove the stored cookies.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!(path = ?self.path, "Cleared cookies");
        }
        Ok(())
    }

    /// `Cookie` header value for requests to `domain_hint` hosts.
    pub fn header_for(&self, domain_hint: &str) -> String {
        cookie_header(&self.load(), domain_hint)
    }
}

impl Default for CookieStore {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            path: PathBuf::from(".litscout_cookies.json"),
        })
    }
}

/// Join the cookies whose domain mentions `domain_hint` into a header value.
pub fn cookie_header(cookies: &[Cookie], domain_hint: &str) -> String {
    cookies
        .iter()
        .filter(|c| c.domain.contains(domain_hint))
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}
