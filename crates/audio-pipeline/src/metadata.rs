//! Track metadata extraction.
//!
//! Reading tags is a collaborator concern: the player asks a [`MetadataReader`] for a
//! [`TrackMetadata`] value, and the encoder only forwards one it was handed.

use std::path::Path;

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::meta::{MetadataRevision, StandardTagKey, StandardVisualKey};

use crate::decode::{SourceInfo, probe_file, source_info};
use crate::error::{Error, Result};

/// Embedded artwork.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoverArt {
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Descriptive and technical properties of one track.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<f64>,
    pub codec: Option<String>,
    /// Average bitrate in bits per second.
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub bit_depth: Option<u16>,
    pub channels: Option<u16>,
    pub cover_art: Option<CoverArt>,
}

impl TrackMetadata {
    /// Technical fields only, taken from a probed [`SourceInfo`].
    pub fn from_source_info(info: &SourceInfo) -> Self {
        Self {
            duration: info.duration,
            codec: info.codec.clone(),
            bitrate: info.bitrate,
            sample_rate: Some(info.sample_rate),
            bit_depth: info.bit_depth,
            channels: u16::try_from(info.channels).ok(),
            ..Self::default()
        }
    }
}

/// Reads [`TrackMetadata`] for a media file.
pub trait MetadataReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<TrackMetadata>;
}

const MAX_COVER_ART_BYTES: usize = 5_000_000;

/// [`MetadataReader`] backed by Symphonia's probe and tag parsers.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaMetadataReader;

impl MetadataReader for SymphoniaMetadataReader {
    fn read(&self, path: &Path) -> Result<TrackMetadata> {
        let (mut probed, file_len) = probe_file(path)?;

        let track = probed
            .format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(Error::NoAudioStream)?;
        let info = source_info(path, &track.codec_params, file_len)?;
        let mut meta = TrackMetadata::from_source_info(&info);

        // Tags ahead of the container (ID3v2 and friends) land in the probe result, the rest in
        // the format reader. Earlier values win.
        if let Some(container_meta) = probed.metadata.get() {
            if let Some(rev) = container_meta.current() {
                apply_revision(&mut meta, rev);
            }
        }
        if let Some(rev) = probed.format.metadata().current() {
            apply_revision(&mut meta, rev);
        }

        tracing::debug!(
            path = %path.display(),
            title = meta.title.as_deref().unwrap_or(""),
            has_art = meta.cover_art.is_some(),
            "metadata read"
        );
        Ok(meta)
    }
}

fn apply_revision(meta: &mut TrackMetadata, rev: &MetadataRevision) {
    for tag in rev.tags() {
        let slot = match tag.std_key {
            Some(StandardTagKey::TrackTitle) => &mut meta.title,
            Some(StandardTagKey::Artist) => &mut meta.artist,
            Some(StandardTagKey::Album) => &mut meta.album,
            _ => continue,
        };
        if slot.is_none() {
            let value = tag.value.to_string();
            if !value.trim().is_empty() {
                *slot = Some(value);
            }
        }
    }
    if meta.cover_art.is_none() {
        meta.cover_art = select_cover_art(rev);
    }
}

fn select_cover_art(rev: &MetadataRevision) -> Option<CoverArt> {
    let visual = rev
        .visuals()
        .iter()
        .find(|visual| visual.usage == Some(StandardVisualKey::FrontCover))
        .or_else(|| rev.visuals().first())?;
    if visual.data.len() > MAX_COVER_ART_BYTES {
        return None;
    }
    Some(CoverArt {
        media_type: visual.media_type.clone(),
        data: visual.data.to_vec(),
    })
}
