//! One capture: fetch an ICY stream, demux it, write frames to a temp file.
//!
//! The task reports to its record over a bounded mpsc channel and is told to
//! stop over a watch channel. It never touches the record directly.
//!
//! ```text
//!   Record ──watch<StopSignal>──▶ capture task ──▶ temp file
//!     ▲                                │
//!     └──────mpsc<SessionEvent>────────┘
//! ```

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::RecordError;
use crate::icy::{stream_title, Demuxed, IcyDemuxer};

pub const READ_CHUNK: usize = 4096;
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopSignal {
    #[default]
    Run,
    Finish,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Canceled,
}

#[derive(Debug)]
pub enum SessionEvent {
    Connected { meta_interval: usize },
    Metadata(String),
    Closed(Outcome),
    Failed(RecordError),
}

/// Why the read loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEnd {
    Finished,
    Canceled,
}

/// A response that passed the ICY checks.
pub struct Negotiated {
    pub response: reqwest::Response,
    pub meta_interval: usize,
}

/// Positive `icy-metaint` value, if any.
pub fn meta_interval(headers: &HeaderMap) -> Option<usize> {
    headers
        .get("icy-metaint")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
}

/// GET `url` asking for inline metadata. Waiting for the response headers
/// is bounded by `timeout`.
pub async fn open(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<Negotiated, RecordError> {
    let request = client.get(url).header("Icy-MetaData", "1").send();
    let response = tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| RecordError::Timeout {
            url: url.to_string(),
            after: timeout,
        })?
        .map_err(|source| RecordError::Connection {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(RecordError::Status {
            url: url.to_string(),
            status,
        });
    }

    let meta_interval =
        meta_interval(response.headers()).ok_or_else(|| RecordError::MissingMetaInterval {
            url: url.to_string(),
        })?;

    if let Some(name) = response.headers().get("icy-name").and_then(|v| v.to_str().ok()) {
        info!("session: connected to {:?} ({}), metaint {}", name, url, meta_interval);
    } else {
        info!("session: connected to {}, metaint {}", url, meta_interval);
    }

    Ok(Negotiated {
        response,
        meta_interval,
    })
}

/// Read the body in `READ_CHUNK` pieces until a stop signal arrives,
/// writing every whole frame to `temp`.
///
/// The signal is checked between chunks and also wakes an idle read.
/// A dropped signal sender counts as cancel. The source closing first is
/// an error.
pub async fn capture(
    response: reqwest::Response,
    meta_interval: usize,
    temp: &Path,
    mut stop: watch::Receiver<StopSignal>,
    events: &mpsc::Sender<SessionEvent>,
) -> Result<CaptureEnd, RecordError> {
    let file = tokio::fs::File::create(temp).await?;
    let mut out = BufWriter::new(file);

    let byte_stream = response.bytes_stream();
    let mut reader = tokio_util::io::StreamReader::new(
        byte_stream.map(|result| result.map_err(std::io::Error::other)),
    );

    let mut demux = IcyDemuxer::new(meta_interval);
    let mut buf = vec![0u8; READ_CHUNK];

    let end = loop {
        match *stop.borrow_and_update() {
            StopSignal::Run => {}
            StopSignal::Finish => break CaptureEnd::Finished,
            StopSignal::Cancel => break CaptureEnd::Canceled,
        }

        let n = tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    break CaptureEnd::Canceled;
                }
                continue;
            }
            read = reader.read(&mut buf) => read?,
        };
        if n == 0 {
            return Err(RecordError::SourceClosed);
        }

        for item in demux.feed(&buf[..n]) {
            match item {
                Demuxed::Frame(frame) => out.write_all(&frame).await?,
                Demuxed::Metadata(text) => {
                    debug!(
                        "session: metadata {:?} (title {:?})",
                        text,
                        stream_title(&text)
                    );
                    // Metadata is advisory; drop it rather than stall the read.
                    let _ = events.try_send(SessionEvent::Metadata(text));
                }
            }
        }
    };

    out.flush().await?;
    out.get_ref().sync_all().await?;

    debug!(
        "session: {:?} after {} frames, {} audio bytes, {} metadata blocks",
        end,
        demux.frames(),
        demux.audio_bytes(),
        demux.meta_blocks()
    );
    Ok(end)
}

/// The record's side of a running capture task.
pub struct SessionHandle {
    stop: watch::Sender<StopSignal>,
    events: mpsc::Receiver<SessionEvent>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn spawn<F, Fut>(runtime: &Handle, body: F) -> Self
    where
        F: FnOnce(watch::Receiver<StopSignal>, mpsc::Sender<SessionEvent>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(StopSignal::Run);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let task = runtime.spawn(body(stop_rx, event_tx));
        Self {
            stop: stop_tx,
            events: event_rx,
            task,
        }
    }

    /// Fire-and-forget; the task sees it at its next chunk boundary.
    pub fn signal(&self, signal: StopSignal) {
        self.stop.send_replace(signal);
    }

    pub fn try_next(&mut self) -> Result<SessionEvent, TryRecvError> {
        self.events.try_recv()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("signal", &*self.stop.borrow())
            .field("finished", &self.task.is_finished())
            .finish()
    }
}
