//! Test fixtures
//!
//! Pre-built test data for common testing scenarios.

use crate::auth::Token;

use super::builders::TokenBuilder;

/// JSON body of a show as returned by `GET /<user>/<slug>/`
pub fn show_json(user: &str, slug: &str, name: &str) -> String {
    serde_json::json!({
        "key": format!("/{}/{}/", user, slug),
        "url": format!("https://www.mixcloud.com/{}/{}/", user, slug),
        "name": name,
        "description": "",
        "play_count": 12,
        "user": {"username": user, "name": user},
    })
    .to_string()
}

/// A token past its expiry that can be refreshed
pub fn expired_refreshable_token() -> Token {
    TokenBuilder::new()
        .access("expired_access")
        .refresh("refresh_credential")
        .expired_minutes_ago(10)
        .build()
}

/// A token with a future expiry
pub fn valid_token() -> Token {
    TokenBuilder::new().expires_in_hours(1).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixcloud::Show;

    #[test]
    fn show_json_decodes_into_show() {
        let show: Show = serde_json::from_str(&show_json("dj", "mix", "Mix")).unwrap();
        assert_eq!(show.key, "/dj/mix/");
        assert!(show.has_required_fields());
    }

    #[test]
    fn token_fixtures_have_expected_health() {
        assert!(expired_refreshable_token().is_expired());
        assert!(expired_refreshable_token().can_refresh());
        assert!(valid_token().is_valid());
    }
}
