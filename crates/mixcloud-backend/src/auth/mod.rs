mod callback;
mod endpoint;
mod flow;
pub(crate) mod store;

pub use callback::CALLBACK_PATH;
pub use endpoint::{ProviderTokenEndpoint, TokenEndpoint};
pub use flow::{
    AuthorizationFlow, AuthorizationResult, FlowProgress, FlowState, PendingAuthorization,
};
pub use store::{FileTokenStore, StoreError, Token, TokenStorage, TokenStore};

#[cfg(test)]
pub use endpoint::mock as endpoint_mock;

/// Mixcloud hosted authorization page
pub const AUTHORIZE_URL: &str = "https://www.mixcloud.com/oauth/authorize";

/// Mixcloud authorization-code exchange endpoint
pub const TOKEN_URL: &str = "https://www.mixcloud.com/oauth/access_token";

/// Default loopback port for the OAuth redirect
pub const DEFAULT_REDIRECT_PORT: u16 = 8910;

/// OAuth application settings
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    /// Loopback port for the callback listener; 0 picks a free port
    pub redirect_port: u16,
}

impl OAuthSettings {
    /// Settings for the Mixcloud endpoints
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorize_url: AUTHORIZE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            redirect_port: DEFAULT_REDIRECT_PORT,
        }
    }

    pub fn with_redirect_port(mut self, port: u16) -> Self {
        self.redirect_port = port;
        self
    }

    pub fn with_endpoints(
        mut self,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        self.authorize_url = authorize_url.into();
        self.token_url = token_url.into();
        self
    }

    /// Redirect URI registered with the provider for `port`
    pub fn redirect_uri(port: u16) -> String {
        format!("http://localhost:{}{}", port, CALLBACK_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_to_mixcloud_endpoints() {
        let settings = OAuthSettings::new("id", "secret");
        assert_eq!(settings.authorize_url, AUTHORIZE_URL);
        assert_eq!(settings.token_url, TOKEN_URL);
        assert_eq!(settings.redirect_port, DEFAULT_REDIRECT_PORT);
    }

    #[test]
    fn redirect_uri_uses_callback_path() {
        assert_eq!(
            OAuthSettings::redirect_uri(8910),
            "http://localhost:8910/oauth/callback"
        );
    }
}
