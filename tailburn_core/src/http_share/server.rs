//! HTTP server for the single-use share
//!
//! Two routes live under the secret path: the delivery route and the
//! acknowledgment route. Everything else is a 404.

use super::pages;
use crate::session::{
    ClientKind, DeliveryAction, DeliveryGuard, FALLBACK_SENDER, Session,
};
use crate::transfer::constants::BUFFER_SIZE;
use anyhow::Result;
use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use futures_util::Stream;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, Take};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;

/// No route reads a request body, the form POST is empty
const MAX_REQUEST_BODY: usize = 16 * 1024;

/// Handler for invalid routes - serves 404 page
async fn not_found_handler() -> Response {
    pages::not_found()
}

/// Middleware to add security headers
async fn add_security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'none'; style-src 'unsafe-inline'; script-src 'unsafe-inline'; form-action 'self';",
        ),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    response
}

/// Build the axum router for one session
pub fn create_router(session: Arc<Session>) -> Router {
    let secret_path = session.secret_path().to_string();
    let ack_path = session.ack_path().to_string();

    Router::new()
        .route(&secret_path, get(delivery_handler).post(delivery_handler))
        .route(&ack_path, post(ack_handler))
        .fallback(not_found_handler)
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY))
        .layer(middleware::from_fn(add_security_headers))
        .with_state(session)
}

/// Serve `router` on `listener` until `cancel` fires, then drain gracefully
pub async fn serve(listener: TcpListener, router: Router, cancel: CancellationToken) -> Result<()> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        cancel.cancelled().await;
        tracing::info!("HTTP server shutting down gracefully");
    })
    .await?;

    Ok(())
}

/// Kill switch for cooperating clients. Knowing this path already proves the
/// delivery response was received, so no identity check is repeated.
async fn ack_handler(State(session): State<Arc<Session>>) -> &'static str {
    tracing::info!("ACK received from cooperating client");
    session.acknowledge();
    "OK"
}

/// Delivery route: landing page, burned page or the file itself
async fn delivery_handler(
    State(session): State<Arc<Session>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    // Authorization comes before anything about the file is disclosed
    let identity = match session.resolver().resolve(peer).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::error!("Identity lookup failed for {}: {}", peer, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Identity Error").into_response();
        }
    };
    if !session.is_authorized(&identity) {
        tracing::warn!("BLOCKED: {} ({})", identity, peer);
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }

    let kind = ClientKind::from_headers(&headers);
    match session.plan(&method, kind) {
        DeliveryAction::Gone => gone(),
        DeliveryAction::BurnedPage => pages::burned(),
        DeliveryAction::Landing => landing(&session).await,
        DeliveryAction::Download => match session.try_begin_delivery(kind) {
            Some(guard) => {
                tracing::info!("Sending file to {}...", identity);
                stream_file(&session, guard).await
            }
            None => {
                tracing::warn!("Rejected concurrent delivery attempt from {}", identity);
                match kind {
                    ClientKind::Cooperating => gone(),
                    ClientKind::Interactive => pages::burned(),
                }
            }
        },
    }
}

fn gone() -> Response {
    (StatusCode::GONE, "Gone").into_response()
}

async fn landing(session: &Session) -> Response {
    let sender = match session.resolver().self_identity().await {
        Ok(sender) => sender,
        Err(e) => {
            tracing::debug!("Sender lookup failed: {}", e);
            FALLBACK_SENDER.to_string()
        }
    };
    let file = session.file();
    Html(pages::render_landing(&sender, &file.name, &file.size_display)).into_response()
}

fn content_disposition(file_name: &str) -> HeaderValue {
    let quoted: String = file_name
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", quoted))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Open the file fresh and stream it. The guard travels with the body so the
/// delivery slot is held until the last byte is handed off or the stream fails.
async fn stream_file(session: &Session, guard: DeliveryGuard) -> Response {
    let file = session.file();

    let handle = match File::open(&file.path).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("Cannot open {:?}: {}", file.path, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "File Error").into_response();
        }
    };
    // Fresh stat: the file may have changed since startup
    let len = match handle.metadata().await {
        Ok(meta) => meta.len(),
        Err(e) => {
            tracing::error!("Cannot stat {:?}: {}", file.path, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "File Error").into_response();
        }
    };

    let body = DeliveryBody {
        inner: ReaderStream::with_capacity(handle.take(len), BUFFER_SIZE),
        expected: len,
        sent: 0,
        guard: Some(guard),
    };

    (
        [
            (header::CONTENT_DISPOSITION, content_disposition(&file.name)),
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (header::CONTENT_LENGTH, HeaderValue::from(len)),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Response body for one delivery attempt.
///
/// Handing off the last declared byte completes the guard (an empty file
/// completes at end of stream).
/// A read error, a file that shrank, or the body being dropped early (client
/// went away) releases it without burning the session.
struct DeliveryBody {
    inner: ReaderStream<Take<File>>,
    expected: u64,
    sent: u64,
    guard: Option<DeliveryGuard>,
}

impl Stream for DeliveryBody {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
            Some(Ok(chunk)) => {
                this.sent += chunk.len() as u64;
                // hyper stops polling once Content-Length bytes are out, so the
                // last chunk is the completion point
                if this.sent == this.expected {
                    if let Some(guard) = this.guard.take() {
                        guard.complete();
                    }
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                tracing::error!("Transfer failed after {} bytes: {}", this.sent, e);
                this.guard.take();
                Poll::Ready(Some(Err(e)))
            }
            None => {
                let Some(guard) = this.guard.take() else {
                    return Poll::Ready(None);
                };
                if this.sent == this.expected {
                    guard.complete();
                    Poll::Ready(None)
                } else {
                    tracing::error!(
                        "Transfer failed: file ended at {} of {} bytes",
                        this.sent,
                        this.expected
                    );
                    drop(guard);
                    Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file shrank during transfer",
                    ))))
                }
            }
        }
    }
}
