//! Small HTTP surface shared by the agent and the probe server.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// How `/api/v1/tinydns_status` decides whether DNS is up.
#[derive(Debug, Clone)]
pub enum TinyDnsProbe {
    /// Resolve `host` locally. Answers 200 with `OK` or `Down`.
    Lookup { host: String },
    /// Forward to the probe server's `/ping`. Answers 200 `OK` or 500.
    Proxy { url: String, client: reqwest::Client },
}

impl TinyDnsProbe {
    pub fn lookup(host: impl Into<String>) -> Self {
        Self::Lookup { host: host.into() }
    }

    pub fn proxy(server_addr: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::Proxy {
            url: format!("http://{server_addr}/ping"),
            client,
        })
    }

    async fn probe(&self) -> Response {
        match self {
            Self::Lookup { host } => match tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map(|mut addrs| addrs.next())
            {
                Ok(Some(_)) => "OK".into_response(),
                Ok(None) => {
                    warn!(%host, "lookup returned no addresses");
                    "Down".into_response()
                }
                Err(e) => {
                    warn!(%host, error = %e, "lookup failed");
                    "Down".into_response()
                }
            },
            Self::Proxy { url, client } => match client.get(url).send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::OK => "OK".into_response(),
                Ok(resp) => {
                    warn!(%url, status = %resp.status(), "probe server unhealthy");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
                Err(e) => {
                    warn!(%url, error = %e, "probe server unreachable");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            },
        }
    }
}

async fn ping() -> &'static str {
    "OK"
}

async fn tinydns_status(State(probe): State<Arc<TinyDnsProbe>>) -> Response {
    probe.probe().await
}

/// Logs each request inside a span carrying a random 32-hex-digit id, which
/// is echoed back in `x-request-id`.
async fn request_id(req: Request, next: Next) -> Response {
    let id = Uuid::new_v4().simple().to_string();

    let span = info_span!("request", request_id = %id);
    let method = req.method().clone();
    let uri = req.uri().clone();
    span.in_scope(|| info!(%method, %uri, headers = ?req.headers(), "request"));

    let mut resp = next.run(req).instrument(span.clone()).await;
    span.in_scope(|| info!(status = %resp.status(), "response"));
    if let Ok(value) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    resp
}

pub fn router(probe: TinyDnsProbe) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/api/v1/tinydns_status", get(tinydns_status))
        .layer(middleware::from_fn(request_id))
        .with_state(Arc::new(probe))
}

/// Serves until `token` is cancelled, then drains in-flight requests.
pub async fn serve(addr: SocketAddr, probe: TinyDnsProbe, token: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "http server listening");
    axum::serve(listener, router(probe))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    info!("http server stopped");
    Ok(())
}
