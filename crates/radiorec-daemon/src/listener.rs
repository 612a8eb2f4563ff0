//! Root listener that turns entity events into log lines.

use std::sync::{Arc, Weak};

use radiorec_core::collection::Collection;
use radiorec_core::node::{EntityId, Event, EventKind, Listener};
use radiorec_core::program::ProgramStatus;
use radiorec_core::record::RecordStatus;
use radiorec_core::schedule::ScheduleItem;
use radiorec_core::station::Station;
use tracing::{debug, info, trace};

enum Origin {
    Record { station: String, title: String },
    Program { station: String, title: String },
    Other,
}

pub struct StatusLogger {
    stations: Weak<Collection<Station>>,
}

impl StatusLogger {
    pub fn new(stations: &Arc<Collection<Station>>) -> Self {
        Self {
            stations: Arc::downgrade(stations),
        }
    }

    fn resolve(&self, id: EntityId) -> Origin {
        let Some(stations) = self.stations.upgrade() else {
            return Origin::Other;
        };
        for station in stations.snapshot() {
            let found = station.schedule().into_iter().find(|i| i.node().id() == id);
            match found {
                Some(ScheduleItem::Record(r)) => {
                    return Origin::Record {
                        station: station.name(),
                        title: r.title(),
                    }
                }
                Some(ScheduleItem::Program(p)) => {
                    return Origin::Program {
                        station: station.name(),
                        title: p.title(),
                    }
                }
                None => {}
            }
        }
        Origin::Other
    }
}

impl Listener for StatusLogger {
    fn on_event(&self, event: &Event) {
        match &event.kind {
            EventKind::StatusChanged(code) => match self.resolve(event.origin()) {
                Origin::Record { station, title } => {
                    let status = RecordStatus::from_code(*code)
                        .map(|s| s.label())
                        .unwrap_or("?");
                    info!("{} / {:?}: record {}", station, title, status);
                }
                Origin::Program { station, title } => {
                    debug!(
                        "{} / {:?}: program {:?}",
                        station,
                        title,
                        ProgramStatus::from_code(*code)
                    );
                }
                Origin::Other => trace!("entity {}: status {}", event.origin(), code),
            },
            EventKind::StreamTitle(title) => {
                if let Origin::Record { station, .. } = self.resolve(event.origin()) {
                    info!("{}: now playing {:?}", station, title);
                }
            }
            EventKind::ItemsRemoved(ids) => debug!("removed {:?} via {:?}", ids, event.chain),
            other => trace!("event {:?} via {:?}", other, event.chain),
        }
    }
}
