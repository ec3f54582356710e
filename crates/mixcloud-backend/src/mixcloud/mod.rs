mod client;
pub mod http;
mod transport;
mod types;

pub use client::{ClientSettings, MixcloudClient, API_BASE_URL, DESCRIPTION_LIMIT};
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient, TransportError};
pub use transport::{AuthorizedTransport, RefreshInterceptingTransport, RefreshingTokenSource};
pub use types::{Show, ShowKey};
