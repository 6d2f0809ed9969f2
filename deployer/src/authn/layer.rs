//! Tower layer guarding routes with the [`AuthGate`]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::response::{IntoResponse, Response};
use http::Request;
use tower::{Layer, Service};

use crate::authn::gate::AuthGate;

/// Tower layer that rejects requests before they reach the wrapped service
#[derive(Clone)]
pub struct AuthLayer {
    gate: Arc<AuthGate>,
}

impl AuthLayer {
    pub fn new(gate: Arc<AuthGate>) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            gate: self.gate.clone(),
        }
    }
}

/// The service wrapper that performs the check
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    gate: Arc<AuthGate>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for AuthService<S>
where
    S: Service<Request<ReqBody>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let header = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        if let Err(e) = self.gate.authorize(header) {
            tracing::warn!(uri = %req.uri(), "Rejected request: {}", e);
            let response = e.into_response();
            return Box::pin(async move { Ok(response) });
        }

        // the clone may not be ready, keep the one poll_ready was called on
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(req).await })
    }
}
