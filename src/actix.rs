//! Actix integration helpers.

use std::io;

use actix_web::{http::header, web, HttpRequest};
use futures::{channel::mpsc, SinkExt, StreamExt};
use http::Method;

use crate::{parser, Completion, FormPost, StorageEngine};

const FORWARD_QUEUE_DEPTH: usize = 16;

/// Extracts the raw `Content-Type` header from an Actix request.
pub fn content_type_from_request(request: &HttpRequest) -> Option<&str> {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
}

/// Direct-call mode for Actix handlers.
///
/// The payload is forwarded from the worker's local task into the parser,
/// since Actix payloads cannot leave their thread.
pub async fn upload<S>(
    form_post: &FormPost<S>,
    request: &HttpRequest,
    payload: web::Payload,
) -> Completion
where
    S: StorageEngine + 'static,
{
    let Ok(method) = Method::from_bytes(request.method().as_str().as_bytes()) else {
        return Ok(None);
    };
    let content_type = content_type_from_request(request);
    if !parser::accepts(&method, content_type) {
        return Ok(None);
    }

    let (mut tx, rx) = mpsc::channel::<io::Result<web::Bytes>>(FORWARD_QUEUE_DEPTH);
    actix_web::rt::spawn(async move {
        let mut payload = payload;
        while let Some(item) = payload.next().await {
            let item = item.map_err(|err| io::Error::other(err.to_string()));
            if tx.send(item).await.is_err() {
                break;
            }
        }
    });

    form_post.process(&method, content_type, rx).await
}
