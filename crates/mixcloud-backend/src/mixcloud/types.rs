use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::OAuthError;

/// Hosts that serve Mixcloud show pages
const SHOW_HOSTS: &[&str] = &["mixcloud.com", "www.mixcloud.com", "m.mixcloud.com"];

/// A Mixcloud upload ("cloudcast")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Show {
    /// Provider key, e.g. `/user/show-slug/`
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
}

impl Show {
    /// Checks that the fields every show must carry are present
    pub fn has_required_fields(&self) -> bool {
        !self.key.trim().is_empty() && !self.name.trim().is_empty()
    }
}

/// Composite show identifier: owner and show slug
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShowKey {
    pub user: String,
    pub slug: String,
}

impl ShowKey {
    /// Extracts the key from a show URL such as
    /// `https://www.mixcloud.com/user/show-slug/`
    pub fn from_url(raw: &str) -> Result<Self, OAuthError> {
        let raw = raw.trim();
        let url = Url::parse(raw).map_err(|e| OAuthError::invalid_show_url(raw, &e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(OAuthError::invalid_show_url(raw, "scheme must be http or https"));
        }

        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if !SHOW_HOSTS.contains(&host.as_str()) {
            return Err(OAuthError::invalid_show_url(raw, "host is not mixcloud.com"));
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|segment| !segment.is_empty()).collect())
            .unwrap_or_default();

        match segments.as_slice() {
            [user, slug] => Ok(Self {
                user: (*user).to_string(),
                slug: (*slug).to_string(),
            }),
            _ => Err(OAuthError::invalid_show_url(
                raw,
                "path must be /<user>/<show>/",
            )),
        }
    }

    /// Key path as used by the API, with leading and trailing slashes
    pub fn path(&self) -> String {
        format!("/{}/{}/", self.user, self.slug)
    }
}

impl std::fmt::Display for ShowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}
