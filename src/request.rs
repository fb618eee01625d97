//! Per-request orchestration.
//!
//! A request moves through parsing, per-file validation, writing and
//! finalization. Every failure funnels into the request's [`Latch`], so the
//! caller observes exactly one outcome no matter how many files fail.

use std::{collections::HashMap, io, sync::Arc};

use bytes::Bytes;
use futures::{channel::mpsc, stream, SinkExt};
use multer::Field;
use tokio::task::JoinSet;

use crate::{
    config::Limits,
    error::{FormPostError, StorageError},
    latch::Latch,
    naming::resolve_target,
    parser::{FileInfo, PartEvent, PartEvents},
    storage::{BoxStream, FileUpload, StorageEngine, StoredFile},
    Settings, UploadedForm,
};

/// Chunks queued between the parser and a backend writer.
const WRITE_QUEUE_DEPTH: usize = 8;

type WriteOutcome = (String, Result<StoredFile, StorageError>);

/// File held in memory until the body validator admits the request.
struct BufferedFile {
    upload: FileUpload,
    chunks: Vec<Bytes>,
}

/// Destination of a file part's bytes.
enum Sink {
    Buffer(Vec<Bytes>),
    Writer(Option<mpsc::Sender<io::Result<Bytes>>>),
}

impl Sink {
    async fn push(&mut self, chunk: Bytes) {
        match self {
            Self::Buffer(chunks) => chunks.push(chunk),
            Self::Writer(writer) => {
                let Some(tx) = writer else {
                    return;
                };
                // A closed channel means the writer already failed; its error
                // is collected when the task is joined.
                if tx.send(Ok(chunk)).await.is_err() {
                    *writer = None;
                }
            }
        }
    }

    async fn abort(&mut self, reason: &FormPostError) {
        match self {
            Self::Buffer(chunks) => chunks.clear(),
            Self::Writer(writer) => {
                if let Some(mut tx) = writer.take() {
                    let err = io::Error::other(reason.to_string());
                    let _ = tx.send(Err(err)).await;
                }
            }
        }
    }
}

/// Request-scoped state, owned by one request and dropped with it.
pub(crate) struct RequestState<'a, S> {
    settings: &'a Settings,
    storage: &'a Arc<S>,
    fields: HashMap<String, String>,
    files: HashMap<String, Vec<StoredFile>>,
    buffered: Vec<BufferedFile>,
    in_flight: JoinSet<WriteOutcome>,
    latch: Latch,
}

impl<'a, S> RequestState<'a, S>
where
    S: StorageEngine + 'static,
{
    pub(crate) fn new(settings: &'a Settings, storage: &'a Arc<S>) -> Self {
        Self {
            settings,
            storage,
            fields: HashMap::new(),
            files: HashMap::new(),
            buffered: Vec::new(),
            in_flight: JoinSet::new(),
            latch: Latch::new(),
        }
    }

    /// Drives the request to its single outcome.
    pub(crate) async fn run(mut self, mut events: PartEvents) -> Result<UploadedForm, FormPostError> {
        self.parse(&mut events).await;
        self.finalize().await;
        self.settle().await;

        let form = UploadedForm {
            fields: self.fields,
            files: self.files,
        };
        self.latch.resolve(form)
    }

    async fn parse(&mut self, events: &mut PartEvents) {
        loop {
            let event = match events.next_event().await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(err) => {
                    self.latch.trip(err);
                    break;
                }
            };

            match event {
                PartEvent::Field { name, value } => {
                    if let Some(value) = value {
                        tracing::debug!(field = %name, "parsed text field");
                        self.fields.insert(name, value);
                    }
                }
                PartEvent::File { info, body } => self.file(info, body).await,
            }

            if self.latch.is_tripped() {
                break;
            }
        }
    }

    async fn file(&mut self, info: FileInfo, mut body: Field<'static>) {
        tracing::debug!(
            field = %info.field_name,
            file = %info.original_name,
            mime = %info.mime,
            "file part started"
        );

        let settings = self.settings;
        if let Some(validator) = &settings.file_validator {
            match validator.validate(&info).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(field = %info.field_name, file = %info.original_name, "file rejected");
                    self.latch.trip(FormPostError::FileRejected {
                        field: info.field_name,
                        file: info.original_name,
                    });
                    return;
                }
                Err(err) => {
                    self.latch.trip(FormPostError::Validator(err));
                    return;
                }
            }
        }

        let name = settings
            .filename
            .name(&info.original_name, &info.field_name, &info.mime);
        let (directory, filename) = resolve_target(&settings.prefix, &name, &info.original_name);
        let upload = FileUpload {
            info,
            directory,
            filename,
        };

        let mut sink = if settings.body_validator.is_some() {
            Sink::Buffer(Vec::new())
        } else {
            Sink::Writer(Some(self.spawn_writer(upload.clone())))
        };

        match pump(&mut body, &mut sink, &settings.limits, &upload.info.field_name).await {
            Ok(size) => {
                tracing::debug!(field = %upload.info.field_name, size, "file part received");
                if let Sink::Buffer(chunks) = sink {
                    self.buffered.push(BufferedFile { upload, chunks });
                }
            }
            Err(err) => {
                sink.abort(&err).await;
                self.latch.trip(err);
            }
        }
    }

    fn spawn_writer(&mut self, upload: FileUpload) -> mpsc::Sender<io::Result<Bytes>> {
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        self.spawn_store(upload, Box::pin(rx));
        tx
    }

    fn spawn_store(&mut self, upload: FileUpload, body: BoxStream) {
        let storage = Arc::clone(self.storage);
        self.in_flight.spawn(async move {
            let result = storage.store(&upload, body).await;
            (upload.info.field_name, result)
        });
    }

    /// Runs the body validator and commits buffered files it admits.
    async fn finalize(&mut self) {
        if self.latch.is_tripped() {
            return;
        }
        let Some(validator) = self.settings.body_validator.clone() else {
            return;
        };

        let infos: Vec<FileInfo> = self
            .buffered
            .iter()
            .map(|file| file.upload.info.clone())
            .collect();

        match validator.validate(&self.fields, &infos).await {
            Ok(true) => {
                for file in std::mem::take(&mut self.buffered) {
                    let body = stream::iter(file.chunks.into_iter().map(Ok::<Bytes, io::Error>));
                    self.spawn_store(file.upload, Box::pin(body));
                }
            }
            Ok(false) => {
                tracing::warn!(files = infos.len(), "request rejected by body validator");
                self.buffered.clear();
                self.latch.trip(FormPostError::BodyRejected);
            }
            Err(err) => {
                self.buffered.clear();
                self.latch.trip(FormPostError::Validator(err));
            }
        }
    }

    /// Waits for every in-flight write, successful or not.
    async fn settle(&mut self) {
        while let Some(joined) = self.in_flight.join_next().await {
            match joined {
                Ok((field, Ok(stored))) => {
                    self.files.entry(field).or_default().push(stored);
                }
                Ok((field, Err(source))) => {
                    tracing::error!(field = %field, error = %source, "storage write failed");
                    self.latch.trip(FormPostError::Storage { field, source });
                }
                Err(err) => {
                    tracing::error!(error = %err, "storage task failed");
                    self.latch.trip(FormPostError::Storage {
                        field: String::new(),
                        source: StorageError::with_source("storage task failed", err),
                    });
                }
            }
        }
    }
}

/// Moves a file part's bytes into `sink`, enforcing the size limits.
async fn pump(
    body: &mut Field<'static>,
    sink: &mut Sink,
    limits: &Limits,
    field_name: &str,
) -> Result<u64, FormPostError> {
    let mut size = 0u64;

    while let Some(chunk) = body.chunk().await? {
        size += chunk.len() as u64;
        if let Some(max_file_size) = limits.max_file_size {
            if size > max_file_size {
                return Err(FormPostError::FileSizeLimitExceeded {
                    field: field_name.to_owned(),
                    max_file_size,
                });
            }
        }
        sink.push(chunk).await;
    }

    if let Some(min_file_size) = limits.min_file_size {
        if size < min_file_size {
            return Err(FormPostError::FileTooSmall {
                field: field_name.to_owned(),
                size,
                min_file_size,
            });
        }
    }

    Ok(size)
}

/// Collects text fields and discards file contents.
pub(crate) async fn collect_fields(
    mut events: PartEvents,
) -> Result<HashMap<String, String>, FormPostError> {
    let mut fields = HashMap::new();
    while let Some(event) = events.next_event().await? {
        match event {
            PartEvent::Field {
                name,
                value: Some(value),
            } => {
                fields.insert(name, value);
            }
            PartEvent::Field { value: None, .. } => {}
            PartEvent::File { info, .. } => {
                tracing::debug!(field = %info.field_name, "ignoring file part in fields-only mode");
            }
        }
    }
    Ok(fields)
}
