//! Test data builders
//!
//! Provides builder patterns for creating test data with sensible defaults.

use chrono::{Duration, Utc};

use crate::auth::Token;
use crate::mixcloud::Show;

/// Builder for creating test Show objects
#[derive(Debug, Clone)]
pub struct ShowBuilder {
    user: String,
    slug: String,
    name: String,
    description: String,
}

impl ShowBuilder {
    /// Creates a show builder for `/user/slug/`
    pub fn new(user: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            slug: slug.into(),
            name: "Test Show".to_string(),
            description: String::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builds the Show
    pub fn build(self) -> Show {
        Show {
            key: format!("/{}/{}/", self.user, self.slug),
            url: format!("https://www.mixcloud.com/{}/{}/", self.user, self.slug),
            name: self.name,
            description: self.description,
        }
    }
}

/// Builder for creating test Token objects
#[derive(Debug, Clone)]
pub struct TokenBuilder {
    token: Token,
}

impl Default for TokenBuilder {
    fn default() -> Self {
        Self {
            token: Token::new("test_access_token"),
        }
    }
}

impl TokenBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access(mut self, access_token: impl Into<String>) -> Self {
        self.token.access_token = access_token.into();
        self
    }

    pub fn refresh(mut self, refresh_token: impl Into<String>) -> Self {
        self.token.refresh_token = Some(refresh_token.into());
        self
    }

    /// Sets an expiry `minutes` in the past
    pub fn expired_minutes_ago(mut self, minutes: i64) -> Self {
        self.token.expires_at = Some(Utc::now() - Duration::minutes(minutes));
        self
    }

    /// Sets an expiry `hours` in the future
    pub fn expires_in_hours(mut self, hours: i64) -> Self {
        self.token.expires_at = Some(Utc::now() + Duration::hours(hours));
        self
    }

    pub fn build(self) -> Token {
        self.token
    }
}
