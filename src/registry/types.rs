//! Types for service registration and health tracking

use chrono::{DateTime, Utc};
use reqwest::Url;

/// One registered service: logical name, endpoint, and probe-derived health.
///
/// At most one endpoint exists per name at a time; re-registration replaces
/// the previous endpoint (last write wins).
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    /// Normalized (lowercase) service name
    pub name: String,
    /// Base endpoint URL
    pub endpoint: Url,
    /// `None` until the first probe completes
    pub healthy: Option<bool>,
    /// When the health flag was last updated
    pub last_check: Option<DateTime<Utc>>,
}

impl ServiceRecord {
    /// Create a record for a freshly registered service
    pub fn new(name: impl Into<String>, endpoint: Url) -> Self {
        Self {
            name: name.into(),
            endpoint,
            healthy: None,
            last_check: None,
        }
    }
}
