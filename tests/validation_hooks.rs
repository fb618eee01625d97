#![allow(missing_docs)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use form_post::{
    BodyValidator, BoxError, BoxStream, FileInfo, FileUpload, FileValidator, FormPost,
    FormPostError, StorageEngine, StorageError, StoredFile,
};
use futures::{stream, StreamExt};
use http::Method;

const CONTENT_TYPE: &str = "multipart/form-data; boundary=BOUND";

#[derive(Debug, Clone, Default)]
struct RecordingStorage {
    calls: Arc<Mutex<Vec<String>>>,
    fail_on: Vec<&'static str>,
    delay: Option<Duration>,
}

impl RecordingStorage {
    fn failing(names: &[&'static str]) -> Self {
        Self {
            fail_on: names.to_vec(),
            ..Self::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        let mut calls = self.calls.lock().expect("calls lock").clone();
        calls.sort();
        calls
    }
}

#[async_trait]
impl StorageEngine for RecordingStorage {
    async fn store(&self, upload: &FileUpload, mut body: BoxStream) -> Result<StoredFile, StorageError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(upload.info.original_name.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on.iter().any(|name| *name == upload.info.original_name) {
            return Err(StorageError::new("backend unavailable"));
        }

        let mut size = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| StorageError::with_source("aborted", err))?;
            size += chunk.len() as u64;
        }
        Ok(StoredFile::new(upload, format!("mem://{}", upload.key()), size))
    }
}

#[tokio::test]
async fn file_validator_rejection_skips_storage() {
    let storage = RecordingStorage::default();
    let form_post = FormPost::builder()
        .validate_file(|info: &FileInfo| info.mime.type_() == mime::IMAGE)
        .build_with_storage(storage.clone())
        .expect("builder should succeed");

    let body = multipart_body(&[Part::File("doc", "notes.txt", "text/plain", b"hello")]);
    let err = form_post
        .process(&Method::POST, Some(CONTENT_TYPE), bytes_stream(body))
        .await
        .expect_err("text file must be rejected");

    assert!(matches!(
        err,
        FormPostError::FileRejected { ref field, ref file } if field == "doc" && file == "notes.txt"
    ));
    assert!(err.is_validation());
    assert!(storage.calls().is_empty());
}

#[tokio::test]
async fn file_validator_admits_matching_files() {
    let storage = RecordingStorage::default();
    let form_post = FormPost::builder()
        .directory("uploads")
        .validate_file(|info: &FileInfo| info.mime.type_() == mime::IMAGE)
        .build_with_storage(storage.clone())
        .expect("builder should succeed");

    let body = multipart_body(&[Part::File("avatar", "photo.png", "image/png", b"png")]);
    let form = form_post
        .process(&Method::POST, Some(CONTENT_TYPE), bytes_stream(body))
        .await
        .expect("image should pass")
        .expect("form expected");

    let stored = form.file("avatar").expect("avatar");
    assert!(stored.location.starts_with("mem://uploads/"));
    assert_eq!(storage.calls(), ["photo.png"]);
}

#[tokio::test]
async fn rejection_after_accepted_file_stops_later_parts() {
    let storage = RecordingStorage::default();
    let form_post = FormPost::builder()
        .validate_file(|info: &FileInfo| info.mime.type_() == mime::IMAGE)
        .build_with_storage(storage.clone())
        .expect("builder should succeed");

    let body = multipart_body(&[
        Part::File("a", "a.png", "image/png", b"one"),
        Part::File("b", "b.txt", "text/plain", b"two"),
        Part::File("c", "c.png", "image/png", b"three"),
    ]);
    let err = form_post
        .process(&Method::POST, Some(CONTENT_TYPE), bytes_stream(body))
        .await
        .expect_err("second file must be rejected");

    assert!(matches!(err, FormPostError::FileRejected { .. }));
    assert_eq!(storage.calls(), ["a.png"]);
}

struct SlowValidator;

#[async_trait]
impl FileValidator for SlowValidator {
    async fn validate(&self, info: &FileInfo) -> Result<bool, BoxError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if info.original_name.ends_with(".exe") {
            return Err("executables are not scanned".into());
        }
        Ok(true)
    }
}

#[tokio::test]
async fn async_file_validator_error_is_reported() {
    let storage = RecordingStorage::default();
    let form_post = FormPost::builder()
        .file_validator(SlowValidator)
        .build_with_storage(storage.clone())
        .expect("builder should succeed");

    let body = multipart_body(&[Part::File("bin", "setup.exe", "application/octet-stream", b"MZ")]);
    let err = form_post
        .process(&Method::POST, Some(CONTENT_TYPE), bytes_stream(body))
        .await
        .expect_err("validator error must fail the request");

    assert!(matches!(err, FormPostError::Validator(_)));
    assert_eq!(err.status_code(), http::StatusCode::INTERNAL_SERVER_ERROR);
    assert!(storage.calls().is_empty());
}

#[tokio::test]
async fn body_validator_rejection_writes_nothing() {
    let storage = RecordingStorage::default();
    let form_post = FormPost::builder()
        .validate_body(|fields: &HashMap<String, String>, _: &[FileInfo]| {
            fields.get("token").map(String::as_str) == Some("ok")
        })
        .build_with_storage(storage.clone())
        .expect("builder should succeed");

    let body = multipart_body(&[
        Part::Text("token", "nope"),
        Part::File("avatar", "photo.png", "image/png", b"png"),
    ]);
    let err = form_post
        .process(&Method::POST, Some(CONTENT_TYPE), bytes_stream(body))
        .await
        .expect_err("body must be rejected");

    assert!(matches!(err, FormPostError::BodyRejected));
    assert!(err.is_validation());
    assert!(storage.calls().is_empty());
}

#[tokio::test]
async fn body_validator_sees_fields_sent_after_files() {
    let storage = RecordingStorage::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    let form_post = FormPost::builder()
        .validate_body(move |fields: &HashMap<String, String>, files: &[FileInfo]| {
            recorded
                .lock()
                .expect("seen lock")
                .extend(files.iter().map(|file| file.original_name.clone()));
            fields.get("token").map(String::as_str) == Some("ok")
        })
        .build_with_storage(storage.clone())
        .expect("builder should succeed");

    let body = multipart_body(&[
        Part::File("avatar", "photo.png", "image/png", b"png"),
        Part::Text("token", "ok"),
    ]);
    let form = form_post
        .process(&Method::POST, Some(CONTENT_TYPE), bytes_stream(body))
        .await
        .expect("body should be admitted")
        .expect("form expected");

    assert_eq!(form.file("avatar").expect("avatar").size, 3);
    assert_eq!(*seen.lock().expect("seen lock"), ["photo.png"]);
    assert_eq!(storage.calls(), ["photo.png"]);
}

struct DenyAll;

#[async_trait]
impl BodyValidator for DenyAll {
    async fn validate(
        &self,
        _fields: &HashMap<String, String>,
        _files: &[FileInfo],
    ) -> Result<bool, BoxError> {
        Err("policy service unreachable".into())
    }
}

#[tokio::test]
async fn async_body_validator_error_is_reported() {
    let storage = RecordingStorage::default();
    let form_post = FormPost::builder()
        .body_validator(DenyAll)
        .build_with_storage(storage.clone())
        .expect("builder should succeed");

    let body = multipart_body(&[Part::File("avatar", "photo.png", "image/png", b"png")]);
    let err = form_post
        .process(&Method::POST, Some(CONTENT_TYPE), bytes_stream(body))
        .await
        .expect_err("validator error must fail the request");

    assert!(matches!(err, FormPostError::Validator(_)));
    assert!(storage.calls().is_empty());
}

#[tokio::test]
async fn failing_write_does_not_cancel_sibling() {
    let storage = RecordingStorage::failing(&["bad.txt"]);
    let form_post = FormPost::builder()
        .build_with_storage(storage.clone())
        .expect("builder should succeed");

    let body = multipart_body(&[
        Part::File("good", "good.txt", "text/plain", b"fine"),
        Part::File("bad", "bad.txt", "text/plain", b"broken"),
    ]);
    let err = form_post
        .process(&Method::POST, Some(CONTENT_TYPE), bytes_stream(body))
        .await
        .expect_err("one failed write fails the request");

    assert!(matches!(err, FormPostError::Storage { ref field, .. } if field == "bad"));
    assert_eq!(storage.calls(), ["bad.txt", "good.txt"]);
}

#[tokio::test]
async fn completion_runs_once_when_every_write_fails() {
    let storage = RecordingStorage::failing(&["a.txt", "b.txt", "c.txt"]);
    let form_post = FormPost::builder()
        .build_with_storage(storage.clone())
        .expect("builder should succeed");

    let body = multipart_body(&[
        Part::File("a", "a.txt", "text/plain", b"1"),
        Part::File("b", "b.txt", "text/plain", b"2"),
        Part::File("c", "c.txt", "text/plain", b"3"),
    ]);

    let completions = AtomicUsize::new(0);
    let mut outcome = None;
    form_post
        .upload(&Method::POST, Some(CONTENT_TYPE), bytes_stream(body), |result| {
            completions.fetch_add(1, Ordering::SeqCst);
            outcome = Some(result);
        })
        .await;

    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert!(matches!(outcome, Some(Err(FormPostError::Storage { .. }))));
    assert_eq!(storage.calls().len(), 3);
}

#[tokio::test]
async fn completion_runs_once_without_files() {
    let form_post = FormPost::builder()
        .build_with_storage(RecordingStorage::default())
        .expect("builder should succeed");

    let body = multipart_body(&[Part::Text("name", "Alice")]);
    let completions = AtomicUsize::new(0);
    let mut outcome = None;
    form_post
        .upload(&Method::POST, Some(CONTENT_TYPE), bytes_stream(body), |result| {
            completions.fetch_add(1, Ordering::SeqCst);
            outcome = Some(result);
        })
        .await;

    assert_eq!(completions.load(Ordering::SeqCst), 1);
    let form = outcome
        .expect("callback ran")
        .expect("request should succeed")
        .expect("form expected");
    assert_eq!(form.field("name"), Some("Alice"));
}

#[tokio::test]
async fn slow_storage_hits_request_timeout() {
    let storage = RecordingStorage::slow(Duration::from_secs(30));
    let form_post = FormPost::builder()
        .request_timeout(Duration::from_millis(50))
        .build_with_storage(storage)
        .expect("builder should succeed");

    let body = multipart_body(&[Part::File("doc", "a.txt", "text/plain", b"data")]);
    let err = form_post
        .process(&Method::POST, Some(CONTENT_TYPE), bytes_stream(body))
        .await
        .expect_err("request must time out");

    assert!(matches!(err, FormPostError::Timeout(deadline) if deadline == Duration::from_millis(50)));
    assert_eq!(err.status_code(), http::StatusCode::REQUEST_TIMEOUT);
}

#[tokio::test]
async fn parse_fields_ignores_files() {
    let storage = RecordingStorage::default();
    let form_post = FormPost::builder()
        .build_with_storage(storage.clone())
        .expect("builder should succeed");

    let body = multipart_body(&[
        Part::Text("title", "Holiday"),
        Part::File("photo", "beach.jpg", "image/jpeg", b"jpeg"),
        Part::Text("year", "2024"),
    ]);
    let fields = form_post
        .parse_fields(&Method::POST, Some(CONTENT_TYPE), bytes_stream(body))
        .await
        .expect("fields should parse")
        .expect("multipart request");

    assert_eq!(fields.get("title").map(String::as_str), Some("Holiday"));
    assert_eq!(fields.get("year").map(String::as_str), Some("2024"));
    assert_eq!(fields.len(), 2);
    assert!(storage.calls().is_empty());
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(b"--BOUND\r\n");
        match part {
            Part::Text(name, value) => {
                out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                out.extend_from_slice(value.as_bytes());
            }
            Part::File(name, filename, content_type, body) => {
                out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n"
                    )
                    .as_bytes(),
                );
                out.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
                out.extend_from_slice(body);
            }
        }
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"--BOUND--\r\n");
    out
}

fn bytes_stream(body: Vec<u8>) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> {
    stream::iter([Ok(Bytes::from(body))])
}
