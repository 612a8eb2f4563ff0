//! Turning a finished capture into the user's file.

use std::path::Path;

use anyhow::{Context, Result};
use lofty::config::WriteOptions;
use lofty::prelude::*;
use lofty::tag::{ItemKey, ItemValue, Tag, TagItem, TagType};
use tracing::{debug, warn};

/// Tag values copied from a record when its capture starts. Empty fields are
/// not written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordTags {
    pub track: String,
    pub artist: String,
    pub title: String,
    pub album: String,
    pub year: String,
    pub genre: String,
    pub comment: String,
    pub lyrics: String,
    pub composer: String,
    pub publisher: String,
    pub original_artist: String,
    pub album_artist: String,
    pub copyright: String,
    pub url: String,
    pub encoder: String,
}

impl RecordTags {
    /// Text items. The source URL is a link frame and is written separately.
    fn items(&self) -> [(ItemKey, &str); 14] {
        [
            (ItemKey::TrackNumber, &self.track),
            (ItemKey::TrackArtist, &self.artist),
            (ItemKey::TrackTitle, &self.title),
            (ItemKey::AlbumTitle, &self.album),
            (ItemKey::Year, &self.year),
            (ItemKey::Genre, &self.genre),
            (ItemKey::Comment, &self.comment),
            (ItemKey::Lyrics, &self.lyrics),
            (ItemKey::Composer, &self.composer),
            (ItemKey::Publisher, &self.publisher),
            (ItemKey::OriginalArtist, &self.original_artist),
            (ItemKey::AlbumArtist, &self.album_artist),
            (ItemKey::CopyrightMessage, &self.copyright),
            (ItemKey::EncodedBy, &self.encoder),
        ]
    }
}

/// Produces one playable file at `dest` from the raw capture at `temp`.
///
/// Runs on a blocking thread. The caller deletes `temp` afterwards whether
/// or not this succeeds.
pub trait Finalizer: Send + Sync {
    fn finalize(&self, temp: &Path, dest: &Path, tags: &RecordTags) -> Result<()>;
}

/// Moves the capture into place and writes an ID3v2.4 tag.
#[derive(Debug, Default, Clone, Copy)]
pub struct Id3Finalizer;

impl Finalizer for Id3Finalizer {
    fn finalize(&self, temp: &Path, dest: &Path, tags: &RecordTags) -> Result<()> {
        move_file(temp, dest)?;

        let mut tag = Tag::new(TagType::Id3v2);
        for (key, value) in tags.items() {
            if !value.is_empty() {
                tag.insert_text(key, value.to_string());
            }
        }
        if !tags.url.is_empty() {
            tag.insert(TagItem::new(
                ItemKey::AudioSourceUrl,
                ItemValue::Locator(tags.url.clone()),
            ));
        }
        tag.save_to_path(dest, WriteOptions::default())
            .with_context(|| format!("Failed to save tag to {}", dest.display()))?;

        debug!("finalize: tagged {}", dest.display());
        Ok(())
    }
}

/// Rename, falling back to copy + remove when the two paths are on
/// different filesystems.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    if let Err(e) = std::fs::remove_file(from) {
        warn!("finalize: could not remove {}: {}", from.display(), e);
    }
    Ok(())
}
