//! TOML station loader.
//!
//! ```toml
//! [[station]]
//! name = "Radio One"
//! url = "http://one.example/live"
//!
//! [[station.program]]
//! title = "Jazz Hour"
//! start = 2024-05-01T10:00:00Z
//! finish = "2024-05-01T11:00:00+00:00"
//!
//! [[station.record]]
//! title = "Night Mix"
//! start = 2024-05-01T23:00:00Z
//! finish = 2024-05-02T01:00:00Z
//! irremovable = true
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::context::RecorderContext;
use crate::node::Entity;
use crate::program::Program;
use crate::record::{self, Record};
use crate::station::{RecordNaming, Station};
use crate::window::Window;

/// Intermediate structs that match the TOML tables, kept apart from the
/// entities so the file schema can change without touching them.
#[derive(Debug, Deserialize)]
struct TomlStationFile {
    #[serde(default)]
    station: Vec<TomlStation>,
}

#[derive(Debug, Deserialize)]
struct TomlStation {
    name: String,
    url: String,
    #[serde(default)]
    program: Vec<TomlProgram>,
    #[serde(default)]
    record: Vec<TomlRecord>,
}

/// Either a native TOML datetime or an RFC 3339 string.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct TomlTime(toml::Value);

impl TomlTime {
    fn resolve(&self) -> Result<DateTime<Utc>> {
        let text = match &self.0 {
            toml::Value::Datetime(dt) => dt.to_string(),
            toml::Value::String(s) => s.clone(),
            other => anyhow::bail!("expected a time, found {}", other.type_str()),
        };
        DateTime::parse_from_rfc3339(&text)
            .map(|t| t.with_timezone(&Utc))
            .with_context(|| format!("invalid time {:?} (need RFC 3339 with offset)", text))
    }
}

#[derive(Debug, Deserialize)]
struct TomlProgram {
    title: String,
    #[serde(default)]
    comment: String,
    start: TomlTime,
    finish: TomlTime,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TomlRecord {
    #[serde(default = "default_record_title")]
    title: String,
    start: TomlTime,
    finish: TomlTime,
    #[serde(default)]
    irremovable: bool,
    #[serde(default)]
    file_dir: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    album: String,
    #[serde(default)]
    genre: String,
    #[serde(default)]
    year: String,
}

fn default_record_title() -> String {
    record::DEFAULT_TITLE.to_string()
}

fn window_of(start: &TomlTime, finish: &TomlTime) -> Result<Window> {
    let window = Window::new(start.resolve()?, finish.resolve()?);
    if window.finish <= window.start {
        anyhow::bail!("finish must be after start");
    }
    Ok(window)
}

pub fn load_stations(
    path: &Path,
    ctx: &RecorderContext,
    naming: &RecordNaming,
) -> Result<Vec<Arc<Station>>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading station file {}", path.display()))?;
    let stations = parse_stations_from_toml_str(&content, Some(path), ctx, naming, Utc::now())
        .with_context(|| format!("parsing station file {}", path.display()))?;
    info!(
        "stations: loaded {} from {}",
        stations.len(),
        path.display()
    );
    Ok(stations)
}

/// Build stations from TOML text. `now` picks the subfolder for records
/// without an explicit `file-dir`.
pub fn parse_stations_from_toml_str(
    content: &str,
    source: Option<&Path>,
    ctx: &RecorderContext,
    naming: &RecordNaming,
    now: DateTime<Utc>,
) -> Result<Vec<Arc<Station>>> {
    let file: TomlStationFile = toml::from_str(content)?;
    let mut stations = Vec::with_capacity(file.station.len());

    for s in file.station {
        let station = Station::new(&s.name, &s.url, source.map(Path::to_path_buf));

        let mut programs = Vec::with_capacity(s.program.len());
        for p in s.program {
            match window_of(&p.start, &p.finish) {
                Ok(window) => programs.push(Program::scheduled(window, &p.title, &p.comment)),
                Err(e) => warn!("stations: skipping program {:?} of {:?}: {:#}", p.title, s.name, e),
            }
        }
        station.programs().add_all(programs);

        for r in s.record {
            let window = match window_of(&r.start, &r.finish) {
                Ok(w) => w,
                Err(e) => {
                    warn!("stations: skipping record {:?} of {:?}: {:#}", r.title, s.name, e);
                    continue;
                }
            };
            let rec = Record::scheduled(ctx.clone(), window, &s.url, &r.title);
            for (key, value) in [
                (record::PROP_COMMENT, &r.comment),
                (record::PROP_ARTIST, &r.artist),
                (record::PROP_ALBUM, &r.album),
                (record::PROP_GENRE, &r.genre),
                (record::PROP_YEAR, &r.year),
            ] {
                if !value.is_empty() {
                    rec.node().set_property(key, value.as_str());
                }
            }
            station.assign_destination(&rec, naming, now);
            if let Some(dir) = &r.file_dir {
                rec.node().set_property(record::PROP_FILE_DIR, dir.as_str());
            }
            if let Some(name) = &r.file_name {
                rec.node().set_property(record::PROP_FILE_NAME, name.as_str());
            }
            rec.node().set_irremovable(r.irremovable);
            if !station.records().add_unique(rec) {
                warn!("stations: duplicate record {:?} of {:?} ignored", r.title, s.name);
            }
        }

        stations.push(station);
    }

    Ok(stations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalize::Id3Finalizer;
    use crate::schedule::Windowed;
    use crate::window::DisplayZone;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use tokio::runtime::Handle;

    fn ctx() -> RecorderContext {
        RecorderContext::new(
            reqwest::Client::new(),
            std::env::temp_dir(),
            chrono::Duration::zero(),
            Arc::new(Id3Finalizer),
            Handle::current(),
        )
    }

    fn naming() -> RecordNaming {
        RecordNaming {
            records_dir: PathBuf::from("/music"),
            subfolders: false,
            subfolders_format: String::new(),
            filename_format: "{station} - {title}".into(),
            zone: DisplayZone::Utc,
        }
    }

    const FILE: &str = r#"
[[station]]
name = "Radio One"
url = "http://one.example/live"

[[station.program]]
title = "Jazz Hour"
comment = "weekly"
start = 2024-05-01T10:00:00Z
finish = "2024-05-01T13:00:00+02:00"

[[station.program]]
title = "Broken"
start = "yesterday"
finish = "today"

[[station.record]]
title = "Night Mix"
start = 2024-05-01T23:00:00Z
finish = 2024-05-02T01:00:00Z
genre = "house"
irremovable = true

[[station.record]]
start = 2024-05-03T08:00:00Z
finish = 2024-05-03T09:00:00Z
file-dir = "/elsewhere"
file-name = "custom"

[[station]]
name = "Bare"
url = "http://bare.example/"
"#;

    #[tokio::test]
    async fn test_parse_station_file() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let source = Path::new("/etc/radiorec/stations.toml");
        let stations =
            parse_stations_from_toml_str(FILE, Some(source), &ctx(), &naming(), now).unwrap();
        assert_eq!(stations.len(), 2);

        let one = &stations[0];
        assert_eq!(one.name(), "Radio One");
        assert_eq!(one.source(), Some(source));
        assert_eq!(one.programs().len(), 1);
        let jazz = one.programs().get(0).unwrap();
        assert_eq!(jazz.title(), "Jazz Hour");
        assert_eq!(
            jazz.window(),
            Some(Window::new(
                Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap(),
            ))
        );

        assert_eq!(one.records().len(), 2);
        let night = one.records().get(0).unwrap();
        assert_eq!(night.url(), "http://one.example/live");
        assert_eq!(night.tags().genre, "house");
        assert!(night.node().is_irremovable());
        assert_eq!(
            night.destination(),
            PathBuf::from("/music/Radio One - Night Mix.mp3")
        );

        let custom = one.records().get(1).unwrap();
        assert_eq!(custom.title(), record::DEFAULT_TITLE);
        assert_eq!(custom.destination(), PathBuf::from("/elsewhere/custom.mp3"));

        assert!(stations[1].programs().is_empty());
    }

    #[tokio::test]
    async fn test_empty_file_has_no_stations() {
        let stations =
            parse_stations_from_toml_str("", None, &ctx(), &naming(), Utc::now()).unwrap();
        assert!(stations.is_empty());
    }

    #[tokio::test]
    async fn test_missing_url_is_an_error() {
        let bad = "[[station]]\nname = \"x\"\n";
        assert!(parse_stations_from_toml_str(bad, None, &ctx(), &naming(), Utc::now()).is_err());
    }
}
