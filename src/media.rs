//! Media-library records and the per-content arena that owns them.

use std::collections::HashMap;

use crate::ids::MediaId;
use crate::store::{RawMedia, StoreError};

/// Literal segment that marks the uploads root inside a storage path.
pub const UPLOADS_ROOT_SEGMENT: &str = "uploads";

/// Read-only projection of one media-library asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRecord {
    id: MediaId,
    alt_text: String,
    title: String,
    file_identifier: String,
    canonical_path_fragment: Option<String>,
}

impl MediaRecord {
    /// Builds a record, deriving the path fragment from `storage_path`.
    pub fn new(
        id: MediaId,
        alt_text: impl Into<String>,
        title: impl Into<String>,
        file_identifier: impl Into<String>,
        storage_path: &str,
    ) -> Self {
        Self {
            id,
            alt_text: alt_text.into(),
            title: title.into(),
            file_identifier: file_identifier.into(),
            canonical_path_fragment: canonical_path_fragment(storage_path),
        }
    }

    /// Projects a raw store row.
    pub fn from_raw(raw: &RawMedia) -> Self {
        Self::new(
            raw.id,
            raw.alt_text.clone(),
            raw.title.clone(),
            raw.file_identifier.clone(),
            &raw.storage_path,
        )
    }

    /// Asset identifier.
    pub fn id(&self) -> MediaId {
        self.id
    }

    /// Stored alt text (may be empty).
    pub fn alt_text(&self) -> &str {
        &self.alt_text
    }

    /// Human title (may be empty).
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Filename-derived slug (may be empty).
    pub fn file_identifier(&self) -> &str {
        &self.file_identifier
    }

    /// Extension-stripped path below the uploads root, when derivable.
    pub fn canonical_path_fragment(&self) -> Option<&str> {
        self.canonical_path_fragment.as_deref()
    }

    /// First non-empty of stored alt text, title and file identifier.
    pub fn candidate_alt_text(&self) -> Option<&str> {
        [
            self.alt_text.as_str(),
            self.title.as_str(),
            self.file_identifier.as_str(),
        ]
        .into_iter()
        .find(|text| !text.is_empty())
    }

    /// Whether this asset's path fragment occurs inside `src`.
    pub fn matches_src(&self, src: &str) -> bool {
        self.canonical_path_fragment
            .as_deref()
            .is_some_and(|fragment| src.contains(fragment))
    }
}

/// Derives the fuzzy join key for a storage path.
///
/// `https://host/wp-content/uploads/2017/01/IMG_0319.jpg` becomes
/// `/2017/01/IMG_0319`, which also occurs in resized variants such as
/// `/2017/01/IMG_0319-160x160.jpg`.
pub fn canonical_path_fragment(storage_path: &str) -> Option<String> {
    let (_, below_root) = storage_path.split_once(UPLOADS_ROOT_SEGMENT)?;
    let (stem, _extension) = below_root.rsplit_once('.')?;
    if stem.trim_matches('/').is_empty() {
        return None;
    }
    Some(stem.to_string())
}

/// Handle into a [`MediaLibrary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaHandle(usize);

/// Media owned by one content record: attached children first, then any
/// assets fetched by id while resolving class tokens.
#[derive(Debug, Clone, Default)]
pub struct MediaLibrary {
    records: Vec<MediaRecord>,
    attached: usize,
    lookups: HashMap<MediaId, Option<MediaHandle>>,
}

impl MediaLibrary {
    /// Library seeded with the content record's attached media, in order.
    pub fn new(attached: Vec<MediaRecord>) -> Self {
        let attached_len = attached.len();
        Self {
            records: attached,
            attached: attached_len,
            lookups: HashMap::new(),
        }
    }

    /// Media associated with the content record through the parent relation.
    pub fn attached(&self) -> &[MediaRecord] {
        &self.records[..self.attached]
    }

    /// Every record held, attached and fetched.
    pub fn records(&self) -> &[MediaRecord] {
        &self.records
    }

    /// Resolves a handle minted by this library.
    pub fn get(&self, handle: MediaHandle) -> Option<&MediaRecord> {
        self.records.get(handle.0)
    }

    /// Looks up `id`, consulting the cache, then attached media, then `fetch`.
    ///
    /// Misses are cached too, so each id reaches the store at most once.
    pub fn lookup<F>(&mut self, id: MediaId, fetch: F) -> Result<Option<MediaHandle>, StoreError>
    where
        F: FnOnce(MediaId) -> Result<Option<MediaRecord>, StoreError>,
    {
        if let Some(cached) = self.lookups.get(&id) {
            return Ok(*cached);
        }

        let handle = match self.records.iter().position(|record| record.id == id) {
            Some(idx) => Some(MediaHandle(idx)),
            None => fetch(id)?.map(|record| {
                self.records.push(record);
                MediaHandle(self.records.len() - 1)
            }),
        };
        self.lookups.insert(id, handle);
        Ok(handle)
    }

    /// First attached record whose path fragment occurs in `src`.
    pub fn match_path(&self, src: &str) -> Option<MediaHandle> {
        self.attached()
            .iter()
            .position(|record| record.matches_src(src))
            .map(MediaHandle)
    }
}
