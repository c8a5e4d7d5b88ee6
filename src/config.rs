//! Portal connection settings.
//!
//! Settings come from an optional JSON file (read-only for this program) and are
//! overridden by CLI flags. The session cookies in the file are produced by whatever
//! performed the captcha login; this program only replays them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_DIR: &str = "course-grab";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub status_path: String,
    pub enroll_path: String,
    pub courses_path: String,
    /// HTML page whose tabs name the enrollment blocks.
    pub blocks_path: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            status_path: "/api/course/status".into(),
            enroll_path: "/api/course/select".into(),
            courses_path: "/api/course/block".into(),
            blocks_path: "/xsxk/zzxkyzb_cxZzxkYzbIndex.html?gnmkdm=N253512&layout=default".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub base_url: String,
    pub username: String,
    pub cookies: BTreeMap<String, String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub user_agent: String,
    pub endpoints: Endpoints,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            username: String::new(),
            cookies: BTreeMap::new(),
            timeout: Duration::from_secs(10),
            user_agent: format!("course-grab/{}", env!("CARGO_PKG_VERSION")),
            endpoints: Endpoints::default(),
        }
    }
}

impl PortalConfig {
    /// Value for the `Cookie` request header, if any cookies are configured.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
}

/// Load the config file. An explicit path must exist; a missing default file yields defaults.
pub fn load(explicit: Option<&Path>) -> Result<PortalConfig> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => match default_config_path() {
            Some(p) if p.exists() => p,
            _ => {
                tracing::debug!("no config file found, using defaults");
                return Ok(PortalConfig::default());
            }
        },
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("read config {}", path.display()))?;
    let cfg: PortalConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parse config {}", path.display()))?;
    tracing::info!(path = %path.display(), user = %cfg.username, "loaded portal config");
    Ok(cfg)
}

/// Parse a `NAME=VALUE` cookie flag.
pub fn parse_cookie(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {s:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("cookie name is empty in {s:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
