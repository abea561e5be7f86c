//! HTTP control surface

mod handlers;

use crate::command::Dispatcher;
use axum::{
    body::Body,
    http::{Method, Request},
    routing::get,
    Router,
};
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::Span;

/// Upper bound on any single request, including waited-for replies
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
}

/// Request span with the path only; the query string carries the token
fn request_span(request: &Request<Body>) -> Span {
    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
    )
}

/// Create the router with every endpoint and middleware
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/list", get(handlers::list))
        .route("/send", get(handlers::send))
        .route("/sendAll", get(handlers::send_all))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET])
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::fmt;
    use std::sync::Arc;
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id};
    use tracing_subscriber::layer::{Context, Layer};
    use tracing_subscriber::prelude::*;

    /// Collects every field recorded on new spans
    #[derive(Clone, Default)]
    struct SpanFields(Arc<Mutex<Vec<String>>>);

    impl Visit for SpanFields {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.lock().push(format!("{}={:?}", field.name(), value));
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for SpanFields {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
            attrs.record(&mut self.clone());
        }
    }

    #[test]
    fn test_request_span_omits_query() {
        let fields = SpanFields::default();
        let subscriber = tracing_subscriber::registry().with(fields.clone());

        let request = Request::builder()
            .uri("/send?token=hunter2&ip=10.0.0.1&command=status")
            .body(Body::empty())
            .unwrap();
        tracing::subscriber::with_default(subscriber, || {
            let _span = request_span(&request);
        });

        let recorded = fields.0.lock().join(" ");
        assert!(recorded.contains("path=/send"), "{}", recorded);
        assert!(recorded.contains("method=GET"), "{}", recorded);
        assert!(!recorded.contains("hunter2"), "{}", recorded);
        assert!(!recorded.contains("token"), "{}", recorded);
    }
}
