//! Axum integration: middleware mode and fields-only mode.
//!
//! ```no_run
//! # use axum::{routing::post, Extension, Router};
//! # use form_post::{axum::{middleware, Middleware}, Backend, FormPost, UploadedForm};
//! # fn app(form_post: FormPost) -> Router {
//! async fn handler(Extension(form): Extension<UploadedForm>) -> String {
//!     format!("{} file(s)", form.file_count())
//! }
//!
//! Router::new()
//!     .route("/upload", post(handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         Middleware::new(form_post),
//!         middleware::<Backend>,
//!     ))
//! # }
//! ```

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{parser, FormPost, FormPostError, StorageEngine, UploadedForm};

/// Decision taken by an error handler.
#[derive(Debug)]
pub enum ErrorAction {
    /// Pass the request on without an [`UploadedForm`] extension.
    Continue,
    /// Answer the request with this response.
    Respond(Response),
}

type ErrorHandler = dyn Fn(&FormPostError) -> ErrorAction + Send + Sync;

/// State for [`middleware`] and [`fields_middleware`].
pub struct Middleware<S> {
    form_post: FormPost<S>,
    on_error: Option<Arc<ErrorHandler>>,
}

impl<S> Clone for Middleware<S> {
    fn clone(&self) -> Self {
        Self {
            form_post: self.form_post.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<S> Middleware<S> {
    /// Wraps an instance. Errors are logged and answered with
    /// [`FormPostError::status_code`] unless a handler is installed.
    pub fn new(form_post: FormPost<S>) -> Self {
        Self {
            form_post,
            on_error: None,
        }
    }

    /// Installs an error handler.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&FormPostError) -> ErrorAction + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }
}

/// Extracts the raw `Content-Type` header from Axum request headers.
pub fn content_type_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
}

/// Ingests multipart POST requests and stores the outcome as an
/// [`UploadedForm`] request extension before calling the next handler.
///
/// Requests that are not multipart POSTs, or that already carry an
/// [`UploadedForm`], pass through untouched.
pub async fn middleware<S>(
    State(state): State<Middleware<S>>,
    request: Request,
    next: Next,
) -> Response
where
    S: StorageEngine + 'static,
{
    let content_type = content_type_from_headers(request.headers()).map(ToOwned::to_owned);
    if request.extensions().get::<UploadedForm>().is_some()
        || !parser::accepts(request.method(), content_type.as_deref())
    {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let outcome = state
        .form_post
        .process(&parts.method, content_type.as_deref(), body.into_data_stream())
        .await;

    match outcome {
        Ok(form) => {
            if let Some(form) = form {
                parts.extensions.insert(form);
            }
            next.run(Request::from_parts(parts, Body::empty())).await
        }
        Err(err) => fail(&state, err, parts, next).await,
    }
}

/// Parses only the scalar fields of multipart POST requests and stores them
/// as an [`UploadedForm`] without files. File contents are discarded.
///
/// The inserted extension marks the request as parsed, so a [`middleware`]
/// layered after this one passes it through.
pub async fn fields_middleware<S>(
    State(state): State<Middleware<S>>,
    request: Request,
    next: Next,
) -> Response
where
    S: StorageEngine + 'static,
{
    let content_type = content_type_from_headers(request.headers()).map(ToOwned::to_owned);
    if request.extensions().get::<UploadedForm>().is_some()
        || !parser::accepts(request.method(), content_type.as_deref())
    {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let outcome = state
        .form_post
        .parse_fields(&parts.method, content_type.as_deref(), body.into_data_stream())
        .await;

    match outcome {
        Ok(fields) => {
            if let Some(fields) = fields {
                parts.extensions.insert(UploadedForm {
                    fields,
                    files: HashMap::new(),
                });
            }
            next.run(Request::from_parts(parts, Body::empty())).await
        }
        Err(err) => fail(&state, err, parts, next).await,
    }
}

async fn fail<S>(
    state: &Middleware<S>,
    err: FormPostError,
    parts: axum::http::request::Parts,
    next: Next,
) -> Response {
    match &state.on_error {
        Some(handler) => match handler(&err) {
            ErrorAction::Continue => next.run(Request::from_parts(parts, Body::empty())).await,
            ErrorAction::Respond(response) => response,
        },
        None => {
            tracing::warn!(error = %err, "rejecting multipart request");
            (err.status_code(), err.to_string()).into_response()
        }
    }
}
