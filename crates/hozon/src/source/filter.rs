//! Camera include/exclude filtering

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::clip::{ClipMetadata, RawClip};

/// Case-insensitive camera name filter. Exclusion wins over inclusion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraFilter {
    /// Empty means every camera is included
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
}

impl CameraFilter {
    /// Filter that keeps every clip
    pub fn all() -> Self {
        Self::default()
    }

    /// Build from comma-separated lists (`CAMERA_INCLUDE_LIST`,
    /// `CAMERA_EXCLUDE_LIST`). A `*` entry in the include list matches all.
    pub fn from_lists(include: &str, exclude: &str) -> Self {
        let include = parse_list(include);
        let include = if include.contains("*") {
            BTreeSet::new()
        } else {
            include
        };
        Self {
            include,
            exclude: parse_list(exclude),
        }
    }

    pub fn include<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.include
            .extend(names.into_iter().map(|s| s.as_ref().trim().to_lowercase()));
        self.include.remove("*");
        self
    }

    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.exclude
            .extend(names.into_iter().map(|s| s.as_ref().trim().to_lowercase()));
        self
    }

    pub fn matches_all(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether a camera passes the filter. Expects any casing.
    pub fn matches(&self, camera_name: &str) -> bool {
        let cam = camera_name.to_lowercase();
        (self.include.is_empty() || self.include.contains(&cam)) && !self.exclude.contains(&cam)
    }
}

fn parse_list(list: &str) -> BTreeSet<String> {
    list.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Normalize raw device records and drop clips rejected by `filter`.
///
/// Pure: no I/O, order preserved.
pub fn normalize_and_filter(raw: Vec<RawClip>, filter: &CameraFilter) -> Vec<ClipMetadata> {
    let total = raw.len();
    let clips: Vec<ClipMetadata> = raw
        .into_iter()
        .filter(|clip| filter.matches(&clip.camera_key()))
        .filter_map(|clip| {
            let id = clip.id.clone();
            let normalized = ClipMetadata::from_raw(clip);
            if normalized.is_none() {
                warn!(clip = %id, "Skipping clip with out-of-range timestamps");
            }
            normalized
        })
        .collect();

    if clips.len() != total {
        debug!("Filtered {} of {} clips", total - clips.len(), total);
    }
    clips
}
