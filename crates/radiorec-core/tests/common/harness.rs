#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use radiorec_core::context::RecorderContext;
use radiorec_core::finalize::{move_file, Finalizer, RecordTags};
use radiorec_core::node::{Event, EventKind, Listener, Node};
use radiorec_core::record::{Record, RecordStatus};
use tokio::runtime::Handle;

/// Moves the capture into place untouched.
pub struct CopyFinalizer;

impl Finalizer for CopyFinalizer {
    fn finalize(&self, temp: &Path, dest: &Path, _tags: &RecordTags) -> anyhow::Result<()> {
        move_file(temp, dest)
    }
}

pub fn context(temp_dir: &Path, pad: chrono::Duration) -> RecorderContext {
    context_with(temp_dir, pad, Arc::new(CopyFinalizer))
}

pub fn context_with(
    temp_dir: &Path,
    pad: chrono::Duration,
    finalizer: Arc<dyn Finalizer>,
) -> RecorderContext {
    RecorderContext::new(
        reqwest::Client::new(),
        temp_dir,
        pad,
        finalizer,
        Handle::current(),
    )
}

pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
}

/// Collects every event delivered to the node it is attached to.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn attach(node: &Node) -> Arc<Self> {
        let log = Arc::new(Self::default());
        let weak: Weak<dyn Listener> = Arc::downgrade(&log) as Weak<dyn Listener>;
        node.add_listener(weak);
        log
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Status codes reported for `origin`, in order.
    pub fn statuses_of(&self, origin: u64) -> Vec<i32> {
        self.events()
            .into_iter()
            .filter(|e| e.origin() == origin)
            .filter_map(|e| match e.kind {
                EventKind::StatusChanged(code) => Some(code),
                _ => None,
            })
            .collect()
    }

    pub fn stream_titles(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e.kind {
                EventKind::StreamTitle(t) => Some(t),
                _ => None,
            })
            .collect()
    }
}

impl Listener for EventLog {
    fn on_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Poll the record until `done` holds or ten seconds pass.
pub async fn wait_for(record: &Record, done: impl Fn(RecordStatus) -> bool) -> RecordStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        record.poll_session();
        let status = record.status();
        if done(status) || tokio::time::Instant::now() >= deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn temp_captures(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("RadioRec-"))
        })
        .collect()
}
