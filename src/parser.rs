//! Adapter over the `multer` streaming multipart parser.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use http::Method;
use mime::Mime;
use multer::{Constraints, Field, Multipart, SizeLimit};

use crate::{config::Limits, error::FormPostError};

const DEFAULT_ENCODING: &str = "7bit";
const CONTENT_TRANSFER_ENCODING: &str = "content-transfer-encoding";

/// Metadata of an incoming file part, as announced by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Form field name.
    pub field_name: String,
    /// Client-supplied filename.
    pub original_name: String,
    /// Declared content type, `application/octet-stream` when absent.
    pub mime: Mime,
    /// Declared transfer encoding, `7bit` when absent.
    pub encoding: String,
}

/// Event emitted while walking a multipart body.
pub(crate) enum PartEvent {
    /// A scalar field. `value` is `None` when the value exceeded
    /// `max_field_size` and was dropped.
    Field { name: String, value: Option<String> },
    /// A file part whose bytes are read from `body`.
    File {
        info: FileInfo,
        body: Field<'static>,
    },
}

/// Multipart event source for one request.
pub(crate) struct PartEvents {
    multipart: Multipart<'static>,
    max_field_size: Option<u64>,
}

/// Returns `true` when the request must go through the multipart parser.
pub fn accepts(method: &Method, content_type: Option<&str>) -> bool {
    method == Method::POST && content_type.is_some_and(is_multipart_form_data)
}

fn is_multipart_form_data(content_type: &str) -> bool {
    content_type
        .parse::<Mime>()
        .map(|mime| mime.essence_str() == "multipart/form-data")
        .unwrap_or(false)
}

impl PartEvents {
    /// Opens the parser, or returns `Ok(None)` when the request bypasses it.
    pub(crate) fn open<S, O, E>(
        method: &Method,
        content_type: Option<&str>,
        body: S,
        limits: &Limits,
    ) -> Result<Option<Self>, FormPostError>
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let Some(content_type) = content_type else {
            return Ok(None);
        };
        if !accepts(method, Some(content_type)) {
            return Ok(None);
        }

        let boundary = multer::parse_boundary(content_type)?;
        let mut size_limit = SizeLimit::new();
        if let Some(max_body_size) = limits.max_body_size {
            size_limit = size_limit.whole_stream(max_body_size);
        }
        let constraints = Constraints::new().size_limit(size_limit);

        Ok(Some(Self {
            multipart: Multipart::with_constraints(body, boundary, constraints),
            max_field_size: limits.max_field_size,
        }))
    }

    /// Returns the next field or file event, `None` once the body is done.
    pub(crate) async fn next_event(&mut self) -> Result<Option<PartEvent>, FormPostError> {
        loop {
            let Some(mut field) = self.multipart.next_field().await? else {
                return Ok(None);
            };
            let name = field.name().unwrap_or_default().to_owned();

            let Some(original_name) = field.file_name().map(ToOwned::to_owned) else {
                let value = read_text(&mut field, self.max_field_size).await?;
                if value.is_none() {
                    tracing::warn!(field = %name, "dropping text field over max_field_size");
                }
                return Ok(Some(PartEvent::Field { name, value }));
            };

            if original_name.is_empty() {
                tracing::debug!(field = %name, "skipping file part without filename");
                continue;
            }

            let info = FileInfo {
                field_name: name,
                original_name,
                mime: field
                    .content_type()
                    .cloned()
                    .unwrap_or(mime::APPLICATION_OCTET_STREAM),
                encoding: field
                    .headers()
                    .get(CONTENT_TRANSFER_ENCODING)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or(DEFAULT_ENCODING)
                    .to_owned(),
            };
            return Ok(Some(PartEvent::File { info, body: field }));
        }
    }
}

async fn read_text(
    field: &mut Field<'static>,
    max_field_size: Option<u64>,
) -> Result<Option<String>, FormPostError> {
    let mut buf = BytesMut::new();
    let mut truncated = false;
    while let Some(chunk) = field.chunk().await? {
        if truncated {
            continue;
        }
        buf.extend_from_slice(&chunk);
        if max_field_size.is_some_and(|max| buf.len() as u64 > max) {
            truncated = true;
            buf.clear();
        }
    }

    if truncated {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}
