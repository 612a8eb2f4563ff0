//! The periodic pass that drives every program and record forward.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::collection::Collection;
use crate::node::{Entity, Node};
use crate::program::Program;
use crate::record::Record;
use crate::station::Station;
use crate::window::Window;

/// An entity scheduled over a window.
pub trait Windowed: Entity {
    /// `None` when the bounds are missing or unparsable.
    fn window(&self) -> Option<Window>;
}

#[derive(Debug, Clone)]
pub enum ScheduleItem {
    Program(Arc<Program>),
    Record(Arc<Record>),
}

impl ScheduleItem {
    fn as_windowed(&self) -> &dyn Windowed {
        match self {
            ScheduleItem::Program(p) => p.as_ref(),
            ScheduleItem::Record(r) => r.as_ref(),
        }
    }

    pub fn node(&self) -> &Node {
        self.as_windowed().node()
    }

    pub fn window(&self) -> Option<Window> {
        self.as_windowed().window()
    }

    pub fn update(&self, now: DateTime<Utc>) {
        self.as_windowed().update(now)
    }
}

/// Visit every station, and through it every program and record, with the
/// same `now`. Members that asked to be removed leave their collection in
/// one batch once that collection's visit is complete.
pub fn schedule_update_pass(stations: &Collection<Station>, now: DateTime<Utc>) {
    trace!("schedule: pass at {}", now);
    stations.sweep(now);
}

/// Records that currently own a capture task.
pub fn active_records(stations: &Collection<Station>) -> Vec<Arc<Record>> {
    stations
        .snapshot()
        .iter()
        .flat_map(|s| s.records().snapshot())
        .filter(|r| r.status().is_active())
        .collect()
}

/// Ask every running record to stop and keep what it has. Returns how many
/// were signalled.
pub fn finish_all(stations: &Collection<Station>) -> usize {
    let mut signalled = 0;
    for record in active_records(stations) {
        if record.finish() {
            signalled += 1;
        }
    }
    signalled
}
