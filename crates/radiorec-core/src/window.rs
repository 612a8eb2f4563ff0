//! Scheduled windows and their text form on entity properties.

use chrono::{DateTime, Duration, Local, NaiveDateTime, Utc};

use crate::node::Node;

pub const PROP_TIME_START: &str = "time-start";
pub const PROP_TIME_FINISH: &str = "time-finish";

/// Storage pattern for window bounds, always UTC.
pub const TIME_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub finish: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, finish: DateTime<Utc>) -> Self {
        Self { start, finish }
    }

    pub fn read(node: &Node) -> Option<Self> {
        Some(Self {
            start: time_property(node, PROP_TIME_START)?,
            finish: time_property(node, PROP_TIME_FINISH)?,
        })
    }

    pub fn write(&self, node: &Node) {
        set_time_property(node, PROP_TIME_START, self.start);
        set_time_property(node, PROP_TIME_FINISH, self.finish);
    }

    /// Same start, finish pushed out by `pad`.
    pub fn padded(&self, pad: Duration) -> Self {
        Self {
            start: self.start,
            finish: self.finish + pad,
        }
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.finish
    }

    /// Elapsed share of the window in whole percent, clamped to 0..=100.
    /// A window without positive length reports 0 before it and 100 after.
    pub fn progress(&self, now: DateTime<Utc>) -> u8 {
        let total = (self.finish - self.start).num_seconds();
        if total <= 0 {
            return if now >= self.finish { 100 } else { 0 };
        }
        let elapsed = (now - self.start).num_seconds();
        (elapsed * 100 / total).clamp(0, 100) as u8
    }
}

/// Zone used when expanding naming patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayZone {
    #[default]
    Utc,
    Local,
}

impl DisplayZone {
    pub fn format(self, time: DateTime<Utc>, fmt: &str) -> String {
        match self {
            DisplayZone::Utc => time.format(fmt).to_string(),
            DisplayZone::Local => time.with_timezone(&Local).format(fmt).to_string(),
        }
    }
}

pub fn format_time(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text.trim(), TIME_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

pub fn time_property(node: &Node, key: &str) -> Option<DateTime<Utc>> {
    node.property(key).as_deref().and_then(parse_time)
}

pub fn set_time_property(node: &Node, key: &str, time: DateTime<Utc>) {
    node.set_property(key, format_time(time));
}

/// Parse a trailing pad written as `NNmNNs` (e.g. `05m30s`).
pub fn parse_time_append(text: &str) -> Option<Duration> {
    let text = text.trim();
    let (minutes, rest) = text.split_once('m')?;
    let seconds = rest.strip_suffix('s')?;
    let minutes: i64 = minutes.parse().ok()?;
    let seconds: i64 = seconds.parse().ok()?;
    if minutes < 0 || !(0..60).contains(&seconds) {
        return None;
    }
    Some(Duration::minutes(minutes) + Duration::seconds(seconds))
}
