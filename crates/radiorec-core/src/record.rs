//! A recording of one station over one window.
//!
//! Status moves PENDING → STARTUP → RUNNING → STOPPING → {DONE | CANCELED},
//! with FAILED reachable from any active state. Every move is a
//! compare-and-set on the node. The network side lives in a capture task
//! (see [`crate::session`]); the record only signals it and drains its
//! reports on `update`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::context::RecorderContext;
use crate::error::RecordError;
use crate::finalize::{Finalizer, RecordTags};
use crate::icy::stream_title;
use crate::node::{lock, Entity, EventKind, Node};
use crate::schedule::Windowed;
use crate::session::{self, CaptureEnd, Outcome, SessionEvent, SessionHandle, StopSignal};
use crate::window::{DisplayZone, Window};

pub const PROP_FILE_DIR: &str = "file-dir";
pub const PROP_FILE_NAME: &str = "file-name";
pub const PROP_TRACK: &str = "track";
pub const PROP_ARTIST: &str = "artist";
pub const PROP_TITLE: &str = "title";
pub const PROP_ALBUM: &str = "album";
pub const PROP_YEAR: &str = "year";
pub const PROP_GENRE: &str = "genre";
pub const PROP_COMMENT: &str = "comment";
pub const PROP_LYRICS: &str = "lyrics";
pub const PROP_COMPOSER: &str = "composer";
pub const PROP_PUBLISHER: &str = "publisher";
pub const PROP_ORIGINAL_ARTIST: &str = "original-artist";
pub const PROP_ALBUM_ARTIST: &str = "album-artist";
pub const PROP_COPYRIGHT: &str = "copyright";
pub const PROP_URL: &str = "url";
pub const PROP_ENCODER: &str = "encoder";

pub const DEFAULT_TITLE: &str = "New record";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RecordStatus {
    Pending = 0,
    Startup = 1,
    Running = 2,
    Stopping = 3,
    Canceled = 4,
    Failed = 5,
    Done = 6,
}

impl RecordStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Pending,
            1 => Self::Startup,
            2 => Self::Running,
            3 => Self::Stopping,
            4 => Self::Canceled,
            5 => Self::Failed,
            6 => Self::Done,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Failed | Self::Done)
    }

    /// A capture task may exist.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Startup | Self::Running | Self::Stopping)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Startup => "startup",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug)]
pub struct Record {
    node: Node,
    ctx: RecorderContext,
    session: Mutex<Option<SessionHandle>>,
    failure: Mutex<Option<String>>,
}

impl Record {
    pub fn new(ctx: RecorderContext) -> Arc<Self> {
        Self::from_properties(ctx, [(PROP_TITLE, DEFAULT_TITLE)])
    }

    pub fn from_properties<I, K, V>(ctx: RecorderContext, props: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Arc::new(Self {
            node: Node::with_properties(props),
            ctx,
            session: Mutex::new(None),
            failure: Mutex::new(None),
        })
    }

    pub fn scheduled(ctx: RecorderContext, window: Window, url: &str, title: &str) -> Arc<Self> {
        let record = Self::from_properties(ctx, [(PROP_URL, url), (PROP_TITLE, title)]);
        window.write(&record.node);
        record
    }

    pub fn status(&self) -> RecordStatus {
        // Codes only ever come from RecordStatus::code.
        RecordStatus::from_code(self.node.status()).unwrap_or(RecordStatus::Failed)
    }

    pub fn url(&self) -> String {
        self.node.text(PROP_URL)
    }

    pub fn title(&self) -> String {
        self.node.text(PROP_TITLE)
    }

    /// `file-dir/file-name.mp3`
    pub fn destination(&self) -> PathBuf {
        PathBuf::from(self.node.text(PROP_FILE_DIR))
            .join(format!("{}.mp3", self.node.text(PROP_FILE_NAME)))
    }

    pub fn tags(&self) -> RecordTags {
        let n = &self.node;
        RecordTags {
            track: n.text(PROP_TRACK),
            artist: n.text(PROP_ARTIST),
            title: n.text(PROP_TITLE),
            album: n.text(PROP_ALBUM),
            year: n.text(PROP_YEAR),
            genre: n.text(PROP_GENRE),
            comment: n.text(PROP_COMMENT),
            lyrics: n.text(PROP_LYRICS),
            composer: n.text(PROP_COMPOSER),
            publisher: n.text(PROP_PUBLISHER),
            original_artist: n.text(PROP_ORIGINAL_ARTIST),
            album_artist: n.text(PROP_ALBUM_ARTIST),
            copyright: n.text(PROP_COPYRIGHT),
            url: n.text(PROP_URL),
            encoder: n.text(PROP_ENCODER),
        }
    }

    /// Text of the error that sent this record to FAILED.
    pub fn failure(&self) -> Option<String> {
        lock(&self.failure).clone()
    }

    pub fn has_session(&self) -> bool {
        lock(&self.session).is_some()
    }

    /// Replace `{year} {month} {day} {hour} {minute} {second}` (taken from
    /// the finish time), `{start}` / `{finish}` as `HHMMSS`, `{title}` and
    /// `{comment}`. Time placeholders stay as-is without a window.
    pub fn expand_pattern(&self, pattern: &str, zone: DisplayZone) -> String {
        let mut out = pattern
            .replace("{title}", &self.node.text(PROP_TITLE))
            .replace("{comment}", &self.node.text(PROP_COMMENT));
        if let Some(w) = self.window() {
            for (key, fmt) in [
                ("{year}", "%Y"),
                ("{month}", "%m"),
                ("{day}", "%d"),
                ("{hour}", "%H"),
                ("{minute}", "%M"),
                ("{second}", "%S"),
                ("{finish}", "%H%M%S"),
            ] {
                out = out.replace(key, &zone.format(w.finish, fmt));
            }
            out = out.replace("{start}", &zone.format(w.start, "%H%M%S"));
        }
        out
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// PENDING → STARTUP, launching the capture task.
    pub fn start(&self) -> bool {
        if !self
            .node
            .transition(RecordStatus::Pending.code(), RecordStatus::Startup.code())
        {
            return false;
        }

        let id = self.node.id();
        let url = self.url();
        let temp = self.ctx.temp_file();
        let dest = self.destination();
        let tags = self.tags();
        let client = self.ctx.client().clone();
        let response_timeout = self.ctx.response_timeout();
        let finalizer = self.ctx.finalizer();

        info!(
            "record {}: starting {:?} from {} into {}",
            id,
            tags.title,
            url,
            temp.display()
        );

        let handle = SessionHandle::spawn(self.ctx.runtime(), move |stop, events| {
            run_capture(CaptureJob {
                client,
                url,
                response_timeout,
                temp,
                dest,
                tags,
                finalizer,
                stop,
                events,
            })
        });
        *lock(&self.session) = Some(handle);
        true
    }

    /// Stop and keep the recording. Only a running record can be finished.
    pub fn finish(&self) -> bool {
        self.stop_with(StopSignal::Finish)
    }

    /// Stop and discard the recording. Only a running record can be canceled.
    pub fn cancel(&self) -> bool {
        self.stop_with(StopSignal::Cancel)
    }

    fn stop_with(&self, signal: StopSignal) -> bool {
        if !self
            .node
            .transition(RecordStatus::Running.code(), RecordStatus::Stopping.code())
        {
            return false;
        }
        info!("record {}: stopping ({:?})", self.node.id(), signal);
        if let Some(handle) = lock(&self.session).as_ref() {
            handle.signal(signal);
        }
        true
    }

    /// Apply whatever the capture task has reported so far.
    pub fn poll_session(&self) {
        let (events, disconnected) = {
            let mut guard = lock(&self.session);
            let Some(handle) = guard.as_mut() else {
                return;
            };
            let mut events = Vec::new();
            let disconnected = loop {
                match handle.try_next() {
                    Ok(event) => events.push(event),
                    Err(TryRecvError::Empty) => break false,
                    Err(TryRecvError::Disconnected) => break true,
                }
            };
            (events, disconnected)
        };

        let mut ended = false;
        for event in events {
            ended |= self.apply(event);
        }
        if !ended && disconnected {
            self.fail(RecordError::SessionLost);
            ended = true;
        }
        if ended {
            *lock(&self.session) = None;
        }
    }

    /// Returns true for the task's last report.
    fn apply(&self, event: SessionEvent) -> bool {
        let id = self.node.id();
        match event {
            SessionEvent::Connected { meta_interval } => {
                if self
                    .node
                    .transition(RecordStatus::Startup.code(), RecordStatus::Running.code())
                {
                    info!("record {}: running (metaint {})", id, meta_interval);
                }
                false
            }
            SessionEvent::Metadata(text) => {
                if let Some(title) = stream_title(&text) {
                    debug!("record {}: stream title {:?}", id, title);
                    self.node.notify(EventKind::StreamTitle(title));
                }
                false
            }
            SessionEvent::Closed(outcome) => {
                let to = match outcome {
                    Outcome::Done => RecordStatus::Done,
                    Outcome::Canceled => RecordStatus::Canceled,
                };
                if self
                    .node
                    .transition(RecordStatus::Stopping.code(), to.code())
                {
                    info!("record {}: {}", id, to);
                } else {
                    warn!(
                        "record {}: capture closed as {} while {}",
                        id,
                        to,
                        self.status()
                    );
                }
                true
            }
            SessionEvent::Failed(e) => {
                self.fail(e);
                true
            }
        }
    }

    /// Give up on a capture that never connected. The task is told to
    /// cancel and its handle dropped, so nothing it reports later applies.
    fn abandon_startup(&self) {
        self.poll_session();
        if self.status() != RecordStatus::Startup {
            return;
        }
        if let Some(handle) = lock(&self.session).take() {
            handle.signal(StopSignal::Cancel);
        }
        self.fail(RecordError::WindowClosed);
    }

    fn fail(&self, e: RecordError) {
        error!("record {}: failed: {}", self.node.id(), e);
        *lock(&self.failure) = Some(e.to_string());
        for from in [
            RecordStatus::Startup,
            RecordStatus::Running,
            RecordStatus::Stopping,
        ] {
            if self
                .node
                .transition(from.code(), RecordStatus::Failed.code())
            {
                break;
            }
        }
    }
}

impl Windowed for Record {
    fn window(&self) -> Option<Window> {
        Window::read(&self.node)
    }
}

impl Entity for Record {
    fn node(&self) -> &Node {
        &self.node
    }

    fn update(&self, now: DateTime<Utc>) {
        if let Some(window) = self.window() {
            let padded = window.padded(self.ctx.time_append());
            match self.status() {
                RecordStatus::Pending => {
                    if now >= padded.finish {
                        self.node.set_pending_removal(true);
                    } else if padded.contains(now) {
                        self.start();
                    }
                }
                RecordStatus::Startup => {
                    if now >= padded.finish {
                        self.abandon_startup();
                    }
                }
                RecordStatus::Running => {
                    let progress = padded.progress(now);
                    if progress > self.node.progress() {
                        self.node.set_progress(progress);
                    }
                    if now >= padded.finish {
                        self.finish();
                    }
                }
                RecordStatus::Done => self.node.set_pending_removal(true),
                _ => {}
            }
        }
        self.poll_session();
    }

    fn removable(&self) -> bool {
        !self.node.is_irremovable() && !self.status().is_active()
    }
}

// ── Capture task ──────────────────────────────────────────────────────────────

struct CaptureJob {
    client: reqwest::Client,
    url: String,
    response_timeout: std::time::Duration,
    temp: PathBuf,
    dest: PathBuf,
    tags: RecordTags,
    finalizer: Arc<dyn Finalizer>,
    stop: watch::Receiver<StopSignal>,
    events: mpsc::Sender<SessionEvent>,
}

async fn run_capture(job: CaptureJob) {
    let events = job.events.clone();
    let temp = job.temp.clone();

    let last = match capture_and_finalize(job).await {
        Ok(outcome) => SessionEvent::Closed(outcome),
        Err(e) => SessionEvent::Failed(e),
    };

    match tokio::fs::remove_file(&temp).await {
        Ok(()) => debug!("session: removed {}", temp.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("session: could not remove {}: {}", temp.display(), e),
    }

    let _ = events.send(last).await;
}

async fn capture_and_finalize(job: CaptureJob) -> Result<Outcome, RecordError> {
    let CaptureJob {
        client,
        url,
        response_timeout,
        temp,
        dest,
        tags,
        finalizer,
        mut stop,
        events,
    } = job;

    let negotiated = tokio::select! {
        opened = session::open(&client, &url, response_timeout) => opened?,
        // Only an abandoned startup signals or drops the sender this early.
        _ = stop.changed() => return Ok(Outcome::Canceled),
    };
    let _ = events
        .send(SessionEvent::Connected {
            meta_interval: negotiated.meta_interval,
        })
        .await;

    let end = session::capture(
        negotiated.response,
        negotiated.meta_interval,
        &temp,
        stop,
        &events,
    )
    .await?;

    match end {
        CaptureEnd::Canceled => Ok(Outcome::Canceled),
        CaptureEnd::Finished => {
            let path = dest.clone();
            tokio::task::spawn_blocking(move || finalizer.finalize(&temp, &dest, &tags))
                .await
                .map_err(|e| RecordError::Finalize {
                    path: path.clone(),
                    message: e.to_string(),
                })?
                .map_err(|e| RecordError::Finalize {
                    path: path.clone(),
                    message: format!("{:#}", e),
                })?;
            info!("session: saved {}", path.display());
            Ok(Outcome::Done)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalize::Id3Finalizer;
    use crate::node::tests::attach;
    use chrono::{Duration, TimeZone};
    use tokio::runtime::Handle;

    fn ctx() -> RecorderContext {
        RecorderContext::new(
            reqwest::Client::new(),
            std::env::temp_dir(),
            Duration::seconds(30),
            Arc::new(Id3Finalizer),
            Handle::current(),
        )
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    fn half_hour(ctx: RecorderContext) -> Arc<Record> {
        Record::scheduled(
            ctx,
            Window::new(at(10, 0, 0), at(10, 30, 0)),
            "http://127.0.0.1:9/stream",
            "Morning",
        )
    }

    #[test]
    fn test_status_codes() {
        for code in 0..7 {
            assert_eq!(RecordStatus::from_code(code).unwrap().code(), code);
        }
        assert_eq!(RecordStatus::from_code(7), None);
        assert!(RecordStatus::Stopping.is_active());
        assert!(!RecordStatus::Done.is_active());
        assert!(RecordStatus::Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_new_record_has_default_title() {
        let r = Record::new(ctx());
        assert_eq!(r.title(), DEFAULT_TITLE);
        assert_eq!(r.status(), RecordStatus::Pending);
    }

    #[tokio::test]
    async fn test_pending_waits_before_window() {
        let r = half_hour(ctx());
        r.update(at(9, 59, 59));
        assert_eq!(r.status(), RecordStatus::Pending);
        assert!(!r.has_session());
    }

    #[tokio::test]
    async fn test_elapsed_pending_requests_removal_once_pad_passes() {
        let r = half_hour(ctx());
        r.update(at(10, 30, 29));
        // Still inside the padded window: it starts instead.
        assert_eq!(r.status(), RecordStatus::Startup);

        let late = half_hour(ctx());
        late.update(at(10, 30, 30));
        assert_eq!(late.status(), RecordStatus::Pending);
        assert!(late.node().is_pending_removal());
    }

    #[tokio::test]
    async fn test_irremovable_pending_is_not_marked() {
        let r = half_hour(ctx());
        r.node().set_irremovable(true);
        r.update(at(11, 0, 0));
        assert!(!r.node().is_pending_removal());
        assert_eq!(r.status(), RecordStatus::Pending);
    }

    #[tokio::test]
    async fn test_finish_and_cancel_need_running() {
        let r = half_hour(ctx());
        assert!(!r.finish());
        assert!(!r.cancel());
        assert_eq!(r.status(), RecordStatus::Pending);
    }

    #[tokio::test]
    async fn test_active_record_is_not_removable() {
        let r = half_hour(ctx());
        assert!(r.removable());
        r.node().set_status(RecordStatus::Running.code());
        assert!(!r.removable());
        r.node().set_status(RecordStatus::Done.code());
        assert!(r.removable());
    }

    #[tokio::test]
    async fn test_running_progress_is_monotonic_and_hits_100() {
        let r = half_hour(ctx());
        r.node().set_status(RecordStatus::Running.code());
        r.update(at(10, 15, 15));
        assert_eq!(r.node().progress(), 50);
        r.node().set_progress(70);
        r.update(at(10, 15, 15));
        assert_eq!(r.node().progress(), 70);
        r.update(at(10, 30, 30));
        assert_eq!(r.node().progress(), 100);
        assert_eq!(r.status(), RecordStatus::Stopping);
    }

    #[tokio::test]
    async fn test_unreachable_source_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let r = Record::scheduled(
            ctx(),
            Window::new(at(10, 0, 0), at(10, 30, 0)),
            &format!("http://{}/stream", addr),
            "Morning",
        );
        let rec = attach(r.node());
        assert!(r.start());
        assert!(!r.start());

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
        while r.status() != RecordStatus::Failed && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            r.poll_session();
        }
        assert_eq!(r.status(), RecordStatus::Failed);
        assert!(!r.has_session());
        assert!(r.failure().unwrap().contains(&addr.to_string()));
        assert_eq!(
            rec.kinds(),
            vec![
                EventKind::StatusChanged(RecordStatus::Startup.code()),
                EventKind::StatusChanged(RecordStatus::Failed.code()),
            ]
        );
    }

    #[tokio::test]
    async fn test_expand_pattern() {
        let r = half_hour(ctx());
        r.node().set_property(PROP_COMMENT, "live");
        assert_eq!(
            r.expand_pattern(
                "{year}{month}{day} {hour}{minute}{second} {title} ({comment}) {start}-{finish}",
                DisplayZone::Utc
            ),
            "20240501 103000 Morning (live) 100000-103000"
        );

        let untimed = Record::new(ctx());
        assert_eq!(
            untimed.expand_pattern("{year} {title}", DisplayZone::Utc),
            "{year} New record"
        );
    }

    #[tokio::test]
    async fn test_destination_and_tags() {
        let r = half_hour(ctx());
        r.node().set_property(PROP_FILE_DIR, "/music/Station");
        r.node().set_property(PROP_FILE_NAME, "show");
        r.node().set_property(PROP_GENRE, "jazz");
        assert_eq!(r.destination(), PathBuf::from("/music/Station/show.mp3"));
        let tags = r.tags();
        assert_eq!(tags.title, "Morning");
        assert_eq!(tags.genre, "jazz");
        assert_eq!(tags.url, "http://127.0.0.1:9/stream");
    }
}
