//! Local HTTP listener for the OAuth redirect

use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Path the provider redirects the browser to
pub const CALLBACK_PATH: &str = "/oauth/callback";

const MAX_REQUEST_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Query parameters of a callback request
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = Some(value.into_owned());
            match name.as_ref() {
                "code" => params.code = value,
                "state" => params.state = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        params
    }
}

/// Page shown to the browser after a callback
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CallbackReply {
    Success,
    Failure(String),
    AlreadyCompleted,
}

/// Receives callbacks from the listener
#[async_trait]
pub(crate) trait CallbackHandler: Send + Sync {
    async fn handle(&self, params: CallbackParams) -> CallbackReply;
}

/// Loopback listener bound for the lifetime of one authorization
pub(crate) struct CallbackServer {
    listener: TcpListener,
    port: u16,
}

impl CallbackServer {
    /// Binds the loopback interface; port 0 picks a free port
    pub async fn bind(port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await?;
        let port = listener.local_addr()?.port();
        tracing::debug!("Callback listener bound on 127.0.0.1:{}", port);
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serves connections until `shutdown` fires or its sender is dropped
    ///
    /// The listening socket is closed when the returned task completes.
    pub fn spawn(
        self,
        handler: Arc<dyn CallbackHandler>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!("Callback connection from {}", peer);
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, handler).await {
                                    tracing::debug!("Callback connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => tracing::warn!("Callback listener accept failed: {}", e),
                    },
                }
            }
            tracing::debug!("Callback listener on port {} stopped", self.port);
        })
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    handler: Arc<dyn CallbackHandler>,
) -> std::io::Result<()> {
    let request = tokio::time::timeout(READ_TIMEOUT, read_request_head(&mut stream))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "request head timeout"))??;

    let response = match parse_request_line(&request) {
        Some(("GET", target)) => {
            let (path, query) = target.split_once('?').unwrap_or((target, ""));
            if path == CALLBACK_PATH {
                let reply = handler.handle(CallbackParams::from_query(query)).await;
                render_reply(&reply)
            } else {
                http_response(404, "Not Found", &error_html("Unknown path"))
            }
        }
        Some(_) => http_response(405, "Method Not Allowed", &error_html("Method not allowed")),
        None => http_response(400, "Bad Request", &error_html("Malformed request")),
    };

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Splits `GET /path?query HTTP/1.1` into method and target
fn parse_request_line(request: &str) -> Option<(&str, &str)> {
    let mut parts = request.lines().next()?.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    parts.next()?.starts_with("HTTP/").then_some((method, target))
}

fn render_reply(reply: &CallbackReply) -> String {
    match reply {
        CallbackReply::Success => http_response(200, "OK", &success_html()),
        CallbackReply::Failure(message) => http_response(400, "Bad Request", &error_html(message)),
        CallbackReply::AlreadyCompleted => http_response(
            200,
            "OK",
            &page(
                "Already Completed",
                "Authorization already completed",
                "This authorization request was already handled. You can close this window.",
            ),
        ),
    }
}

fn http_response(status: u16, reason: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    )
}

pub(crate) fn success_html() -> String {
    page(
        "Authorization Successful",
        "Authorization successful",
        "You can close this window and return to the terminal.",
    )
}

pub(crate) fn error_html(message: &str) -> String {
    page("Authorization Failed", "Authorization failed", &escape_html(message))
}

fn page(title: &str, heading: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{}</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
<h1>{}</h1>
<p>{}</p>
</body>
</html>"#,
        title, heading, body
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
