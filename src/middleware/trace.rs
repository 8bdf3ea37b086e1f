//! Request tracing middleware: stamps every request/response pair with an
//! `X-Trace-Id` header and wraps it in a `tracing` span.
//!
//! Grounded on `slab-server/src/middleware/trace.rs`'s custom
//! `tower::Layer`/`Service` pair. `slab-server` also fire-and-forgets a DB
//! audit-log insert per request; this crate has no database (see
//! DESIGN.md — `sqlx` dropped, state is a JSON document, not a relational
//! store), so the audit trail here is the `tracing` span itself rather
//! than a persisted row.

use std::task::{Context, Poll};
use std::time::Instant;

use axum::http::{HeaderValue, Request};
use axum::response::Response;
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::info_span;
use tracing::Instrument;
use uuid::Uuid;

const TRACE_ID_HEADER: &str = "x-trace-id";

#[derive(Clone)]
pub struct TraceLayer;

impl<S> Layer<S> for TraceLayer {
    type Service = TraceMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceMiddleware { inner }
    }
}

#[derive(Clone)]
pub struct TraceMiddleware<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for TraceMiddleware<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let trace_id = req
            .headers()
            .get(TRACE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            req.headers_mut().insert(TRACE_ID_HEADER, value.clone());
        }

        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let span = info_span!("request", trace_id = %trace_id, method = %method, path = %path);

        let mut inner = self.inner.clone();
        let started = Instant::now();
        let trace_id_for_response = trace_id.clone();

        Box::pin(
            async move {
                let mut response = inner.call(req).await?;
                if let Ok(value) = HeaderValue::from_str(&trace_id_for_response) {
                    response.headers_mut().insert(TRACE_ID_HEADER, value);
                }
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "request completed"
                );
                Ok(response)
            }
            .instrument(span),
        )
    }
}
