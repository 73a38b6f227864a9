//! Streamed `multipart/form-data` bodies.
//!
//! Parts are framed by `reqwest::multipart::Form`. A spawned producer task
//! drains the encoded form, reading attachments lazily chunk by chunk, into a
//! bounded channel while the transport reads the other end as the request
//! body, so attachment sizes never have to fit in memory.

use std::{
    io,
    path::PathBuf,
    pin::pin,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use futures::{
    channel::mpsc::{self, Receiver, Sender},
    stream, SinkExt, Stream, StreamExt, TryStreamExt,
};
use reqwest::multipart::{Form, Part};
use tokio_util::io::ReaderStream;

use crate::{Attachments, HttpError, Params, Result};

/// Chunks buffered between producer and transport.
const CHANNEL_CAPACITY: usize = 8;

type Chunk = io::Result<Bytes>;

/// Everything needed to encode one multipart body; reusable across retries.
#[derive(Clone, Debug)]
pub(crate) struct MultipartPlan {
    file_content_type: String,
    files: Vec<(String, PathBuf)>,
    fields: Vec<(String, String)>,
}

/// A started multipart body and the bookkeeping that goes with it.
pub(crate) struct MultipartBody {
    pub(crate) body: reqwest::Body,
    pub(crate) content_type: String,
    pub(crate) slot: ProducerSlot,
}

/// Error recorded while streaming an attachment, read by the executor once
/// the transport has finished with the body.
#[derive(Clone, Debug, Default)]
pub(crate) struct ProducerSlot(Arc<Mutex<Option<HttpError>>>);

impl ProducerSlot {
    fn record(&self, err: HttpError) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
    }

    pub(crate) fn take(&self) -> Option<HttpError> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl MultipartPlan {
    pub(crate) fn new(attachments: &Attachments, params: &Params) -> Self {
        Self {
            file_content_type: attachments.content_type().to_owned(),
            files: attachments
                .iter()
                .map(|(field, path)| (field.to_owned(), path.clone()))
                .collect(),
            fields: params
                .iter()
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
                .collect(),
        }
    }

    /// Encodes a fresh form and spawns the producer feeding it to the
    /// transport. Each call gets its own boundary.
    pub(crate) fn spawn_body(&self) -> Result<MultipartBody> {
        let (receiver, content_type, slot) = self.start()?;
        Ok(MultipartBody {
            body: reqwest::Body::wrap_stream(receiver),
            content_type,
            slot,
        })
    }

    fn start(&self) -> Result<(Receiver<Chunk>, String, ProducerSlot)> {
        let slot = ProducerSlot::default();
        let form = self.form(&slot)?;
        let content_type = format!("multipart/form-data; boundary={}", form.boundary());
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(produce(form, sender));
        Ok((receiver, content_type, slot))
    }

    /// Attachments first, then every parameter as a plain field.
    fn form(&self, slot: &ProducerSlot) -> Result<Form> {
        let mut form = Form::new();
        for (field, path) in &self.files {
            let chunks = file_chunks(path.clone(), slot.clone());
            let mut part = Part::stream(reqwest::Body::wrap_stream(chunks))
                .mime_str(&self.file_content_type)
                .map_err(|err| {
                    HttpError::Encode(format!(
                        "invalid attachment content type '{}': {err}",
                        self.file_content_type
                    ))
                })?;
            if let Some(name) = path.file_name() {
                part = part.file_name(name.to_string_lossy().into_owned());
            }
            form = form.part(field.clone(), part);
        }
        for (name, value) in &self.fields {
            form = form.text(name.clone(), value.clone());
        }
        Ok(form)
    }
}

/// Forwards the encoded form; stops at the first error or once the consumer
/// goes away.
async fn produce(form: Form, mut tx: Sender<Chunk>) {
    let mut chunks = pin!(form.into_stream());
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %err, "multipart body aborted");
            io::Error::other(err)
        });
        let failed = chunk.is_err();
        if tx.send(chunk).await.is_err() || failed {
            return;
        }
    }
}

/// Opens and reads the attachment only when the transport asks for it. A
/// failure lands in `slot` before the error reaches the transport.
fn file_chunks(path: PathBuf, slot: ProducerSlot) -> impl Stream<Item = Chunk> + Send + 'static {
    stream::once(tokio::fs::File::open(path.clone()))
        .map_ok(ReaderStream::new)
        .try_flatten()
        .inspect_err(move |err| {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "multipart attachment could not be streamed"
            );
            let copy = io::Error::new(err.kind(), err.to_string());
            slot.record(HttpError::file(path.clone(), copy));
        })
}
