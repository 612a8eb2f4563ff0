//! A station: its stream URL, its programs and its records.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::collection::Collection;
use crate::config::Config;
use crate::context::RecorderContext;
use crate::node::{Entity, Event, Listener, Node};
use crate::program::{self, Program};
use crate::record::{self, Record, RecordStatus};
use crate::schedule::{ScheduleItem, Windowed};
use crate::window::{DisplayZone, PROP_TIME_FINISH, PROP_TIME_START};

pub const PROP_STATION_NAME: &str = "station-name";
/// Stream URL new records are pointed at.
pub const PROP_STATION_LINK: &str = "station-link";

/// How finished recordings are laid out on disk.
#[derive(Debug, Clone)]
pub struct RecordNaming {
    pub records_dir: PathBuf,
    pub subfolders: bool,
    pub subfolders_format: String,
    pub filename_format: String,
    pub zone: DisplayZone,
}

impl RecordNaming {
    pub fn from_config(config: &Config) -> Self {
        Self {
            records_dir: config.paths.records_dir.clone(),
            subfolders: config.records.subfolders,
            subfolders_format: config.records.subfolders_format.clone(),
            filename_format: config.records.filename_format.clone(),
            zone: if config.records.local_time {
                DisplayZone::Local
            } else {
                DisplayZone::Utc
            },
        }
    }
}

pub struct Station {
    node: Node,
    source: Option<PathBuf>,
    programs: Arc<Collection<Program>>,
    records: Arc<Collection<Record>>,
    this: Weak<Station>,
}

impl Station {
    /// `source` is the file the station was loaded from, if any.
    pub fn new(name: &str, url: &str, source: Option<PathBuf>) -> Arc<Self> {
        let station = Arc::new_cyclic(|this| Self {
            node: Node::with_properties([(PROP_STATION_NAME, name), (PROP_STATION_LINK, url)]),
            source,
            programs: Collection::new(),
            records: Collection::new(),
            this: this.clone(),
        });
        let listener: Weak<dyn Listener> = station.this.clone();
        station.programs.node().add_listener(listener.clone());
        station.records.node().add_listener(listener);
        station
    }

    pub fn name(&self) -> String {
        self.node.text(PROP_STATION_NAME)
    }

    pub fn url(&self) -> String {
        self.node.text(PROP_STATION_LINK)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn programs(&self) -> &Arc<Collection<Program>> {
        &self.programs
    }

    pub fn records(&self) -> &Arc<Collection<Record>> {
        &self.records
    }

    pub fn is_recording(&self) -> bool {
        self.records
            .snapshot()
            .iter()
            .any(|r| r.status() == RecordStatus::Running)
    }

    /// Programs first, then records.
    pub fn schedule(&self) -> Vec<ScheduleItem> {
        self.programs
            .snapshot()
            .into_iter()
            .map(ScheduleItem::Program)
            .chain(self.records.snapshot().into_iter().map(ScheduleItem::Record))
            .collect()
    }

    // ── Naming ────────────────────────────────────────────────────────────────

    pub fn expand_pattern(&self, pattern: &str) -> String {
        pattern.replace("{station}", &self.name())
    }

    /// Directory for a recording made at `time`.
    pub fn record_dir(&self, naming: &RecordNaming, time: DateTime<Utc>) -> PathBuf {
        if !naming.subfolders {
            return naming.records_dir.clone();
        }
        let mut sub = naming.subfolders_format.clone();
        for (key, fmt) in [
            ("{year}", "%Y"),
            ("{month}", "%m"),
            ("{day}", "%d"),
            ("{hour}", "%H"),
            ("{minute}", "%M"),
            ("{second}", "%S"),
        ] {
            sub = sub.replace(key, &naming.zone.format(time, fmt));
        }
        naming.records_dir.join(self.expand_pattern(&sub))
    }

    pub fn record_file_name(&self, record: &Record, naming: &RecordNaming) -> String {
        self.expand_pattern(&record.expand_pattern(&naming.filename_format, naming.zone))
    }

    /// Fill a record's destination from the naming rules.
    pub fn assign_destination(&self, record: &Record, naming: &RecordNaming, now: DateTime<Utc>) {
        let dir = self.record_dir(naming, now);
        record
            .node()
            .set_property(record::PROP_FILE_DIR, dir.to_string_lossy());
        record
            .node()
            .set_property(record::PROP_FILE_NAME, self.record_file_name(record, naming));
    }

    /// Turn a program into a record of this station. Returns the new record,
    /// or `None` when an equal record is already scheduled.
    pub fn record_program(
        &self,
        program: &Program,
        ctx: &RecorderContext,
        naming: &RecordNaming,
        now: DateTime<Utc>,
    ) -> Option<Arc<Record>> {
        let p = program.node();
        let record = Record::from_properties(
            ctx.clone(),
            [
                (record::PROP_URL, self.url()),
                (record::PROP_TITLE, p.text(program::PROP_TITLE)),
                (record::PROP_COMMENT, p.text(program::PROP_COMMENT)),
                (PROP_TIME_START, p.text(PROP_TIME_START)),
                (PROP_TIME_FINISH, p.text(PROP_TIME_FINISH)),
            ],
        );
        self.assign_destination(&record, naming, now);

        if !self.records.add_unique(record.clone()) {
            return None;
        }
        info!(
            "station {:?}: scheduled {:?} ({:?})",
            self.name(),
            record.title(),
            record.window()
        );
        Some(record)
    }
}

impl Listener for Station {
    fn on_event(&self, event: &Event) {
        self.node.deliver(&event.forwarded_by(self.node.id()));
    }
}

impl Entity for Station {
    fn node(&self) -> &Node {
        &self.node
    }

    fn update(&self, now: DateTime<Utc>) {
        self.programs.sweep(now);
        self.records.sweep(now);
    }

    /// Stations loaded from the same file under the same name are the same
    /// station. Stations without a file are never duplicates.
    fn is_duplicate_of(&self, other: &Self) -> bool {
        self.source.is_some() && self.source == other.source && self.name() == other.name()
    }

    fn removable(&self) -> bool {
        !self.node.is_irremovable()
            && !self
                .records
                .snapshot()
                .iter()
                .any(|r| r.status().is_active())
    }
}

impl std::fmt::Debug for Station {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Station")
            .field("name", &self.name())
            .field("source", &self.source)
            .field("programs", &self.programs.len())
            .field("records", &self.records.len())
            .finish()
    }
}
