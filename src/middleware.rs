//! axum adapter running the Token Binding pipeline on every request.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/", get(handler))
//!     .layer(axum::middleware::from_fn_with_state(pipeline, token_binding_middleware));
//! ```
//!
//! Handlers read the verified identifiers from the rewritten headers or the
//! [`TokenBindingEnv`] extension.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::headers::RequestHeaders;
use crate::pipeline::{TokenBindingEnv, TokenBindingPipeline};

pub async fn token_binding_middleware(
    State(pipeline): State<Arc<TokenBindingPipeline>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let headers = RequestHeaders::from_header_map(&parts.headers);
    let extensions = std::mem::take(&mut parts.extensions);

    let joined = tokio::task::spawn_blocking(move || {
        let result = pipeline.process(headers, &extensions);
        (result, extensions)
    })
    .await;

    let (result, extensions) = match joined {
        Ok(done) => done,
        Err(err) => {
            tracing::error!(error = %err, "token binding pipeline task failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Some(status) = result.disposition.status() {
        return (status, "token binding verification failed").into_response();
    }

    parts.extensions = extensions;
    parts.headers = result.headers.into_header_map();
    parts.extensions.insert::<TokenBindingEnv>(result.env);

    next.run(Request::from_parts(parts, body)).await
}
