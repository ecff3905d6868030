//! ICC profiles and their multi-segment JPEG carriage
//!
//! A profile larger than one APP2 segment is split into chunks. Each chunk
//! payload is `"ICC_PROFILE\0"`, a 1-based chunk index, the chunk count, and
//! up to 65,519 profile bytes.

use crate::{
    error::{Error, Result},
    segment::id,
};
use byteorder::{BigEndian, ReadBytesExt};
use log::warn;
use std::io::Cursor;

/// Bytes before profile data in each chunk: identifier + index + count
pub const CHUNK_HEADER_LEN: usize = 14;

/// Profile bytes carried per APP2 segment
pub const MAX_CHUNK_DATA: usize = 65519;

/// Split a profile into APP2 payloads (identifier and sequence bytes included)
///
/// Returns an error for profiles needing more than 255 chunks.
pub fn chunk_profile(profile: &[u8]) -> Result<Vec<Vec<u8>>> {
    let total = profile.len().div_ceil(MAX_CHUNK_DATA);
    if total > u8::MAX as usize {
        return Err(Error::DataTooLarge {
            size: profile.len(),
            max: MAX_CHUNK_DATA * u8::MAX as usize,
        });
    }

    Ok(profile
        .chunks(MAX_CHUNK_DATA)
        .enumerate()
        .map(|(index, chunk)| {
            let mut payload = Vec::with_capacity(CHUNK_HEADER_LEN + chunk.len());
            payload.extend_from_slice(id::ICC_PROFILE);
            payload.push((index + 1) as u8);
            payload.push(total as u8);
            payload.extend_from_slice(chunk);
            payload
        })
        .collect())
}

/// Collects ICC chunks in stream order and joins them
#[derive(Debug, Default)]
pub struct IccAssembler {
    chunks: Vec<(u8, u8, Vec<u8>)>,
}

impl IccAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an APP2 payload; payloads that are not ICC chunks are ignored
    pub fn push(&mut self, payload: &[u8]) -> bool {
        if payload.len() < CHUNK_HEADER_LEN || !payload.starts_with(id::ICC_PROFILE) {
            return false;
        }
        let index = payload[id::ICC_PROFILE.len()];
        let total = payload[id::ICC_PROFILE.len() + 1];
        self.chunks
            .push((index, total, payload[CHUNK_HEADER_LEN..].to_vec()));
        true
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Join the chunks
    ///
    /// Chunks are ordered by their declared index when the indices form a
    /// consistent set; otherwise stream order is kept.
    pub fn finish(mut self) -> Option<Vec<u8>> {
        if self.chunks.is_empty() {
            return None;
        }

        let count = self.chunks.len();
        let mut indices: Vec<u8> = self.chunks.iter().map(|(i, _, _)| *i).collect();
        indices.sort_unstable();
        indices.dedup();
        let consistent = indices.len() == count
            && indices.iter().all(|&i| i >= 1 && i as usize <= count)
            && self.chunks.iter().all(|(_, t, _)| *t as usize == count);

        if consistent {
            self.chunks.sort_by_key(|(index, _, _)| *index);
        } else {
            warn!(
                "ICC chunk sequence numbers are inconsistent ({} chunks), using stream order",
                count
            );
        }

        let mut profile = Vec::with_capacity(self.chunks.iter().map(|(_, _, d)| d.len()).sum());
        for (_, _, data) in self.chunks {
            profile.extend_from_slice(&data);
        }
        Some(profile)
    }
}

/// Parsed ICC profile header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IccProfile {
    pub size: u32,
    pub cmm_type: String,
    pub version: (u8, u8, u8),
    pub profile_class: String,
    pub color_space: String,
    pub connection_space: String,
    /// Creation date as year, month, day, hour, minute, second
    pub created: [u16; 6],
    pub platform: String,
    pub flags: u32,
    pub manufacturer: String,
    pub model: String,
    pub rendering_intent: u32,
    pub creator: String,
    pub tag_count: u32,
}

impl IccProfile {
    /// Header size of every ICC profile
    pub const HEADER_LEN: usize = 128;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_LEN {
            return Err(Error::Truncated(format!(
                "ICC header needs {} bytes, found {}",
                Self::HEADER_LEN,
                data.len()
            )));
        }
        if &data[36..40] != b"acsp" {
            return Err(Error::InvalidFormat("ICC profile signature 'acsp' missing".into()));
        }

        let sig = |at: usize| -> String {
            String::from_utf8_lossy(&data[at..at + 4])
                .trim_end_matches(['\0', ' '])
                .to_string()
        };
        let mut cursor = Cursor::new(data);
        let size = cursor.read_u32::<BigEndian>()?;

        cursor.set_position(24);
        let mut created = [0u16; 6];
        for value in created.iter_mut() {
            *value = cursor.read_u16::<BigEndian>()?;
        }
        cursor.set_position(44);
        let flags = cursor.read_u32::<BigEndian>()?;
        cursor.set_position(64);
        let rendering_intent = cursor.read_u32::<BigEndian>()?;

        let tag_count = if data.len() >= Self::HEADER_LEN + 4 {
            cursor.set_position(Self::HEADER_LEN as u64);
            cursor.read_u32::<BigEndian>()?
        } else {
            0
        };

        Ok(Self {
            size,
            cmm_type: sig(4),
            version: (data[8], data[9] >> 4, data[9] & 0x0F),
            profile_class: sig(12),
            color_space: sig(16),
            connection_space: sig(20),
            created,
            platform: sig(40),
            flags,
            manufacturer: sig(48),
            model: sig(52),
            rendering_intent,
            creator: sig(80),
            tag_count,
        })
    }

    pub fn profile_class_name(&self) -> &'static str {
        match self.profile_class.as_str() {
            "scnr" => "Input Device",
            "mntr" => "Display Device",
            "prtr" => "Output Device",
            "link" => "DeviceLink",
            "spac" => "ColorSpace Conversion",
            "abst" => "Abstract",
            "nmcl" => "Named Color",
            _ => "Unknown",
        }
    }

    pub fn rendering_intent_name(&self) -> &'static str {
        match self.rendering_intent {
            0 => "Perceptual",
            1 => "Media-Relative Colorimetric",
            2 => "Saturation",
            3 => "ICC-Absolute Colorimetric",
            _ => "Unknown",
        }
    }
}
