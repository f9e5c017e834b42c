//! Content-store boundary: raw rows, query defaults, and the stores that serve them.
//!
//! The reconciliation core only talks to [`ContentStore`]. [`MemoryStore`] backs
//! tests and fixtures, [`JsonlStore`] reads a JSONL export directory and journals
//! body updates, and [`DryRunStore`] wraps either one to make persistence a no-op.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::ids::{ContentId, MediaId, SiteId};

/// Sites listing file inside a [`JsonlStore`] directory.
pub const SITES_FILE: &str = "sites.jsonl";
/// Content rows file inside a [`JsonlStore`] directory.
pub const CONTENT_FILE: &str = "content.jsonl";
/// Media rows file inside a [`JsonlStore`] directory.
pub const MEDIA_FILE: &str = "media.jsonl";
/// Append-only journal of persisted body updates.
pub const JOURNAL_FILE: &str = "content_updates.jsonl";

/// One sub-site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRecord {
    /// Site identifier.
    pub id: SiteId,
    /// Display name.
    pub name: String,
    /// Path prefix of the site (e.g. `/news/`).
    pub path: String,
    /// Published content count, filled in by the store.
    #[serde(default)]
    pub published_count: usize,
}

/// One stored content record as the store returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawContent {
    /// Content identifier.
    pub id: ContentId,
    /// Owning site.
    pub site_id: SiteId,
    /// Path prefix of the owning site.
    #[serde(default)]
    pub site_path: String,
    /// Human title.
    #[serde(default)]
    pub title: String,
    /// Raw HTML body.
    #[serde(default)]
    pub body: String,
    /// Publication status.
    #[serde(default = "default_status")]
    pub status: String,
    /// Content kind (post, page, ...).
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Creation timestamp (`YYYY-MM-DD HH:MM:SS`).
    #[serde(default)]
    pub created_at: String,
    /// Last modification timestamp.
    #[serde(default)]
    pub modified_at: String,
}

fn default_status() -> String {
    "publish".to_string()
}

fn default_kind() -> String {
    "post".to_string()
}

/// One media-library row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMedia {
    /// Media identifier.
    pub id: MediaId,
    /// Content record the asset was uploaded under, if any.
    #[serde(default)]
    pub parent_id: Option<ContentId>,
    /// Stored alt text.
    #[serde(default)]
    pub alt_text: String,
    /// Human title.
    #[serde(default)]
    pub title: String,
    /// Filename-derived slug.
    #[serde(default)]
    pub file_identifier: String,
    /// Permanent storage path (the asset's canonical URL).
    #[serde(default)]
    pub storage_path: String,
}

/// Result ordering for content queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Newest creation time first.
    NewestFirst,
    /// Oldest creation time first.
    OldestFirst,
}

/// Query parameters for content lookups, built once per batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentQuery {
    /// Required publication status.
    pub status: String,
    /// Accepted content kinds.
    pub kinds: Vec<String>,
    /// Result ordering.
    pub order: SortOrder,
    /// Maximum rows returned; `None` means all.
    pub limit: Option<usize>,
}

impl Default for ContentQuery {
    fn default() -> Self {
        Self {
            status: default_status(),
            kinds: vec![default_kind()],
            order: SortOrder::NewestFirst,
            limit: None,
        }
    }
}

impl ContentQuery {
    /// Whether `content` passes the status and kind filters.
    pub fn matches(&self, content: &RawContent) -> bool {
        content.status == self.status && self.kinds.iter().any(|kind| kind == &content.kind)
    }

    /// Filters, orders and truncates `rows` for `site_id`.
    pub fn apply<'a, I>(&self, site_id: SiteId, rows: I) -> Vec<RawContent>
    where
        I: IntoIterator<Item = &'a RawContent>,
    {
        let mut selected: Vec<RawContent> = rows
            .into_iter()
            .filter(|row| row.site_id == site_id && self.matches(row))
            .cloned()
            .collect();
        match self.order {
            SortOrder::NewestFirst => selected.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| b.id.cmp(&a.id))
            }),
            SortOrder::OldestFirst => selected.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            }),
        }
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

/// Failure reported by a content store, carrying every message it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    messages: Vec<String>,
}

impl StoreError {
    /// Error with a single message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }

    /// Error with several messages; an empty list gets a generic message.
    pub fn with_messages(messages: Vec<String>) -> Self {
        if messages.is_empty() {
            return Self::new("content store reported an unspecified error");
        }
        Self { messages }
    }

    fn io(action: &str, path: &Path, err: std::io::Error) -> Self {
        Self::new(format!("failed to {action} {}: {err}", path.display()))
    }

    /// Messages in the order the store reported them.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Consumes the error, yielding its messages.
    pub fn into_messages(self) -> Vec<String> {
        self.messages
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "content store error: {}", self.messages.join("; "))
    }
}

impl Error for StoreError {}

/// Storage collaborator consumed by the reconciliation core.
pub trait ContentStore {
    /// Every site with its published content count.
    fn list_sites(&self) -> Result<Vec<SiteRecord>, StoreError>;

    /// Content of `site_id` selected by `query`.
    fn fetch_published_content(
        &self,
        site_id: SiteId,
        query: &ContentQuery,
    ) -> Result<Vec<RawContent>, StoreError>;

    /// Media uploaded under `content_id`, ascending by id.
    fn fetch_child_media(&self, content_id: ContentId) -> Result<Vec<RawMedia>, StoreError>;

    /// Direct media lookup by id.
    fn fetch_media(&self, media_id: MediaId) -> Result<Option<RawMedia>, StoreError>;

    /// Replaces the stored body of `content_id`.
    fn persist_content_body(&mut self, content_id: ContentId, html: &str)
        -> Result<(), StoreError>;
}

/// Shared row storage behind both concrete stores.
#[derive(Debug, Clone, Default)]
struct Tables {
    sites: BTreeMap<SiteId, SiteRecord>,
    contents: BTreeMap<ContentId, RawContent>,
    media: BTreeMap<MediaId, RawMedia>,
}

impl Tables {
    fn list_sites(&self) -> Vec<SiteRecord> {
        let query = ContentQuery::default();
        self.sites
            .values()
            .map(|site| {
                let published_count = self
                    .contents
                    .values()
                    .filter(|row| row.site_id == site.id && query.matches(row))
                    .count();
                SiteRecord {
                    published_count,
                    ..site.clone()
                }
            })
            .collect()
    }

    fn fetch_published_content(&self, site_id: SiteId, query: &ContentQuery) -> Vec<RawContent> {
        let site_path = self.sites.get(&site_id).map(|site| site.path.clone());
        let mut rows = query.apply(site_id, self.contents.values());
        if let Some(path) = site_path {
            for row in rows.iter_mut().filter(|row| row.site_path.is_empty()) {
                row.site_path = path.clone();
            }
        }
        rows
    }

    fn fetch_child_media(&self, content_id: ContentId) -> Vec<RawMedia> {
        self.media
            .values()
            .filter(|media| media.parent_id == Some(content_id))
            .cloned()
            .collect()
    }

    fn replace_body(&mut self, content_id: ContentId, html: &str) -> Result<(), StoreError> {
        let row = self
            .contents
            .get_mut(&content_id)
            .ok_or_else(|| StoreError::new(format!("content {content_id} does not exist")))?;
        row.body = html.to_string();
        Ok(())
    }
}

/// In-memory store used by tests and fixtures.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Tables,
    failures: HashMap<ContentId, Vec<String>>,
    persisted: Vec<ContentId>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a site.
    pub fn insert_site(&mut self, site: SiteRecord) {
        self.tables.sites.insert(site.id, site);
    }

    /// Adds or replaces a content row.
    pub fn insert_content(&mut self, content: RawContent) {
        self.tables.contents.insert(content.id, content);
    }

    /// Adds or replaces a media row.
    pub fn insert_media(&mut self, media: RawMedia) {
        self.tables.media.insert(media.id, media);
    }

    /// Makes every later persist of `content_id` fail with `messages`.
    pub fn fail_persist(&mut self, content_id: ContentId, messages: Vec<String>) {
        self.failures.insert(content_id, messages);
    }

    /// Current body of `content_id`.
    pub fn body(&self, content_id: ContentId) -> Option<&str> {
        self.tables
            .contents
            .get(&content_id)
            .map(|row| row.body.as_str())
    }

    /// Content ids persisted so far, in write order.
    pub fn persisted(&self) -> &[ContentId] {
        &self.persisted
    }
}

impl ContentStore for MemoryStore {
    fn list_sites(&self) -> Result<Vec<SiteRecord>, StoreError> {
        Ok(self.tables.list_sites())
    }

    fn fetch_published_content(
        &self,
        site_id: SiteId,
        query: &ContentQuery,
    ) -> Result<Vec<RawContent>, StoreError> {
        Ok(self.tables.fetch_published_content(site_id, query))
    }

    fn fetch_child_media(&self, content_id: ContentId) -> Result<Vec<RawMedia>, StoreError> {
        Ok(self.tables.fetch_child_media(content_id))
    }

    fn fetch_media(&self, media_id: MediaId) -> Result<Option<RawMedia>, StoreError> {
        Ok(self.tables.media.get(&media_id).cloned())
    }

    fn persist_content_body(
        &mut self,
        content_id: ContentId,
        html: &str,
    ) -> Result<(), StoreError> {
        if let Some(messages) = self.failures.get(&content_id) {
            return Err(StoreError::with_messages(messages.clone()));
        }
        self.tables.replace_body(content_id, html)?;
        self.persisted.push(content_id);
        Ok(())
    }
}

/// One journaled body update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Updated content record.
    pub content_id: ContentId,
    /// New body.
    pub body: String,
    /// Epoch milliseconds when the update was written.
    pub written_at_epoch_ms: u64,
}

/// Store backed by a directory of JSONL exports.
///
/// Body updates are appended to [`JOURNAL_FILE`] and replayed on open, so the
/// export files themselves are never rewritten.
#[derive(Debug)]
pub struct JsonlStore {
    dir: PathBuf,
    orphaned_entries: usize,
    tables: Tables,
}

impl JsonlStore {
    /// Loads the export in `dir` and replays its journal.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        let mut tables = Tables::default();

        for site in read_jsonl::<SiteRecord>(&dir.join(SITES_FILE))? {
            tables.sites.insert(site.id, site);
        }
        for content in read_jsonl::<RawContent>(&dir.join(CONTENT_FILE))? {
            tables.contents.insert(content.id, content);
        }
        for media in read_jsonl::<RawMedia>(&dir.join(MEDIA_FILE))? {
            tables.media.insert(media.id, media);
        }

        let journal = dir.join(JOURNAL_FILE);
        let mut orphaned_entries = 0;
        if journal.exists() {
            // Last writer wins.
            for entry in read_jsonl::<JournalEntry>(&journal)? {
                if let Err(err) = tables.replace_body(entry.content_id, &entry.body) {
                    orphaned_entries += 1;
                    warn!(
                        content_id = %entry.content_id,
                        written_at_epoch_ms = entry.written_at_epoch_ms,
                        error = %err,
                        "skipping journal entry for content missing from the export"
                    );
                }
            }
        }

        Ok(Self {
            dir,
            tables,
            orphaned_entries,
        })
    }

    /// Journal entries skipped on open because their content is gone.
    pub fn orphaned_entries(&self) -> usize {
        self.orphaned_entries
    }

    /// Directory the store was opened from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current body of `content_id`, journal applied.
    pub fn body(&self, content_id: ContentId) -> Option<&str> {
        self.tables
            .contents
            .get(&content_id)
            .map(|row| row.body.as_str())
    }

    fn append_journal(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        append_jsonl(&self.dir.join(JOURNAL_FILE), std::slice::from_ref(entry))
    }
}

impl ContentStore for JsonlStore {
    fn list_sites(&self) -> Result<Vec<SiteRecord>, StoreError> {
        Ok(self.tables.list_sites())
    }

    fn fetch_published_content(
        &self,
        site_id: SiteId,
        query: &ContentQuery,
    ) -> Result<Vec<RawContent>, StoreError> {
        Ok(self.tables.fetch_published_content(site_id, query))
    }

    fn fetch_child_media(&self, content_id: ContentId) -> Result<Vec<RawMedia>, StoreError> {
        Ok(self.tables.fetch_child_media(content_id))
    }

    fn fetch_media(&self, media_id: MediaId) -> Result<Option<RawMedia>, StoreError> {
        Ok(self.tables.media.get(&media_id).cloned())
    }

    fn persist_content_body(
        &mut self,
        content_id: ContentId,
        html: &str,
    ) -> Result<(), StoreError> {
        if !self.tables.contents.contains_key(&content_id) {
            return Err(StoreError::new(format!(
                "content {content_id} does not exist"
            )));
        }
        let entry = JournalEntry {
            content_id,
            body: html.to_string(),
            written_at_epoch_ms: epoch_ms(),
        };
        self.append_journal(&entry)?;
        self.tables.replace_body(content_id, html)
    }
}

/// Read-through wrapper that accepts every persist without writing.
pub struct DryRunStore<'a, S: ?Sized> {
    inner: &'a S,
}

impl<'a, S: ContentStore + ?Sized> DryRunStore<'a, S> {
    /// Wraps `inner` for a dry run.
    pub fn new(inner: &'a S) -> Self {
        Self { inner }
    }
}

impl<S: ContentStore + ?Sized> ContentStore for DryRunStore<'_, S> {
    fn list_sites(&self) -> Result<Vec<SiteRecord>, StoreError> {
        self.inner.list_sites()
    }

    fn fetch_published_content(
        &self,
        site_id: SiteId,
        query: &ContentQuery,
    ) -> Result<Vec<RawContent>, StoreError> {
        self.inner.fetch_published_content(site_id, query)
    }

    fn fetch_child_media(&self, content_id: ContentId) -> Result<Vec<RawMedia>, StoreError> {
        self.inner.fetch_child_media(content_id)
    }

    fn fetch_media(&self, media_id: MediaId) -> Result<Option<RawMedia>, StoreError> {
        self.inner.fetch_media(media_id)
    }

    fn persist_content_body(
        &mut self,
        _content_id: ContentId,
        _html: &str,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Milliseconds since the Unix epoch, zero if the clock is before it.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}

fn read_jsonl<T>(path: &Path) -> Result<Vec<T>, StoreError>
where
    T: for<'de> Deserialize<'de>,
{
    let file = File::open(path).map_err(|err| StoreError::io("open", path, err))?;
    let reader = BufReader::new(file);
    let mut rows = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| StoreError::io("read", path, err))?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|err| {
            StoreError::new(format!(
                "invalid record at {}:{}: {err}",
                path.display(),
                idx + 1
            ))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Writes `rows` as JSONL to `path`, replacing any existing file.
pub fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| StoreError::io("create", parent, err))?;
    }
    let mut file = File::create(path).map_err(|err| StoreError::io("create", path, err))?;
    for row in rows {
        let line = serde_json::to_string(row)
            .map_err(|err| StoreError::new(format!("failed to encode row: {err}")))?;
        writeln!(file, "{line}").map_err(|err| StoreError::io("write", path, err))?;
    }
    Ok(())
}

/// Appends `rows` as JSONL to `path`, creating it if needed.
pub fn append_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| StoreError::io("create", parent, err))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| StoreError::io("open", path, err))?;
    for row in rows {
        let line = serde_json::to_string(row)
            .map_err(|err| StoreError::new(format!("failed to encode row: {err}")))?;
        writeln!(file, "{line}").map_err(|err| StoreError::io("append to", path, err))?;
    }
    Ok(())
}
