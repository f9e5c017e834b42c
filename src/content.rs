//! One content record and its alt-text reconciliation pass.

use html_fragment::{FragmentError, FragmentLimits, HtmlFragmentDocument, ParseError};
use std::error::Error;
use std::fmt;
use tracing::{debug, warn};

use crate::embedded::EmbeddedImageRef;
use crate::ids::{ContentId, SiteId};
use crate::media::{MediaLibrary, MediaRecord};
use crate::report::{
    body_checksum, AltCounters, ChangeRecord, ReconciliationReport, SurveyCounts, UnresolvedImage,
};
use crate::store::{epoch_ms, ContentStore, RawContent, StoreError};

/// What a reconciliation pass did to the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// At least one alt attribute was rewritten.
    pub changed: bool,
    /// The rewritten body was accepted by the store.
    pub persisted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    Fresh,
    Reconciled,
}

/// A rich-text content record with its parsed body, images and media.
#[derive(Debug)]
pub struct ContentRecord {
    content_id: ContentId,
    site_id: SiteId,
    site_path: String,
    title: String,
    original_body: String,
    content: String,
    fragment: HtmlFragmentDocument,
    media: MediaLibrary,
    embedded_images: Vec<EmbeddedImageRef>,
    counters: AltCounters,
    unresolved_without_alt: Vec<usize>,
    errors: Vec<String>,
    change: Option<ChangeRecord>,
    state: PassState,
}

impl ContentRecord {
    /// Parses `raw`, loads its attached media and resolves every embedded image.
    pub fn load<S>(
        raw: RawContent,
        store: &S,
        limits: &FragmentLimits,
    ) -> Result<Self, ReconcileError>
    where
        S: ContentStore + ?Sized,
    {
        let fragment = HtmlFragmentDocument::parse_with_limits(&raw.body, limits)
            .map_err(|err| match err {
                FragmentError::Parse(parse) => ReconcileError::Parse {
                    content_id: raw.id,
                    source: parse,
                },
                other => ReconcileError::Fragment(other),
            })?;

        let attached = store
            .fetch_child_media(raw.id)?
            .iter()
            .map(MediaRecord::from_raw)
            .collect();
        let mut media = MediaLibrary::new(attached);

        let mut embedded_images = EmbeddedImageRef::extract_all(&fragment);
        for image in &mut embedded_images {
            image.resolve(&mut media, store)?;
        }

        Ok(Self {
            content_id: raw.id,
            site_id: raw.site_id,
            site_path: raw.site_path,
            title: raw.title,
            content: raw.body.clone(),
            original_body: raw.body,
            fragment,
            media,
            embedded_images,
            counters: AltCounters::default(),
            unresolved_without_alt: Vec::new(),
            errors: Vec::new(),
            change: None,
            state: PassState::Fresh,
        })
    }

    /// Content identifier.
    pub fn content_id(&self) -> ContentId {
        self.content_id
    }

    /// Owning site.
    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    /// Path prefix of the owning site.
    pub fn site_path(&self) -> &str {
        &self.site_path
    }

    /// Human title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Current body: the reconciled HTML once a pass changed it, the stored body otherwise.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Parsed body.
    pub fn fragment(&self) -> &HtmlFragmentDocument {
        &self.fragment
    }

    /// Media owned by this record.
    pub fn media(&self) -> &MediaLibrary {
        &self.media
    }

    /// Embedded images in document order.
    pub fn embedded_images(&self) -> &[EmbeddedImageRef] {
        &self.embedded_images
    }

    /// Counters of the last pass.
    pub fn counters(&self) -> AltCounters {
        self.counters
    }

    /// Images without usable alt text from any source.
    pub fn unresolved_without_alt(&self) -> impl Iterator<Item = &EmbeddedImageRef> {
        self.unresolved_without_alt
            .iter()
            .filter_map(|&idx| self.embedded_images.get(idx))
    }

    /// Persistence error messages, in order.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Embedded images served from outside local uploads.
    pub fn external_embedded_images(&self) -> impl Iterator<Item = &EmbeddedImageRef> {
        self.embedded_images
            .iter()
            .filter(|image| image.has_external_src())
    }

    /// Brings every embedded alt attribute in line with the media library and
    /// persists the body when anything changed.
    ///
    /// Persistence failures land in [`errors`](Self::errors); the in-memory
    /// [`content`](Self::content) keeps the rewritten body either way. A record
    /// reconciles at most once.
    pub fn reconcile<S>(&mut self, store: &mut S) -> Result<ReconcileOutcome, ReconcileError>
    where
        S: ContentStore + ?Sized,
    {
        if self.state == PassState::Reconciled {
            return Err(ReconcileError::AlreadyReconciled(self.content_id));
        }
        self.state = PassState::Reconciled;

        let mut changed = false;
        for idx in 0..self.embedded_images.len() {
            let image = &self.embedded_images[idx];
            let library_alt = image
                .alt_text_from_media_library(&self.media)
                .map(str::to_string);

            match library_alt {
                Some(alt) if alt == image.raw_alt() => {
                    self.counters.skipped += 1;
                }
                Some(alt) => {
                    let node = image.node();
                    self.fragment.set_attribute(node, "alt", &alt)?;
                    self.embedded_images[idx].record_alt_rewrite(&alt);
                    self.counters.updated += 1;
                    changed = true;
                }
                None => {
                    self.counters.skipped += 1;
                    if image.raw_alt().is_empty() {
                        self.counters.missing += 1;
                        self.unresolved_without_alt.push(idx);
                    }
                }
            }
        }

        let mut persisted = false;
        if changed {
            let html = self.fragment.serialize();
            match store.persist_content_body(self.content_id, &html) {
                Ok(()) => persisted = true,
                Err(err) => {
                    warn!(
                        site_id = %self.site_id,
                        content_id = %self.content_id,
                        error = %err,
                        "failed to persist reconciled body"
                    );
                    self.errors.extend(err.into_messages());
                }
            }
            self.change = Some(ChangeRecord {
                site_id: self.site_id,
                content_id: self.content_id,
                checksum_before: body_checksum(&self.original_body),
                checksum_after: body_checksum(&html),
                updated: self.counters.updated,
                persisted,
                emitted_at_epoch_ms: epoch_ms(),
            });
            self.content = html;
        }

        debug!(
            site_id = %self.site_id,
            content_id = %self.content_id,
            updated = self.counters.updated,
            skipped = self.counters.skipped,
            missing = self.counters.missing,
            "content reconciled"
        );

        Ok(ReconcileOutcome { changed, persisted })
    }

    /// Report of the last pass.
    pub fn report(&self) -> ReconciliationReport {
        ReconciliationReport {
            site_id: self.site_id,
            content_id: self.content_id,
            counters: self.counters,
            unresolved: self
                .unresolved_without_alt()
                .map(|image| UnresolvedImage {
                    site_id: self.site_id,
                    site_path: self.site_path.clone(),
                    content_id: self.content_id,
                    title: self.title.clone(),
                    src: image.src().to_string(),
                })
                .collect(),
            errors: self.errors.clone(),
            change: self.change.clone(),
        }
    }

    /// Read-only audit counts for this record.
    pub fn survey(&self) -> SurveyCounts {
        let attached = self.media.attached();
        SurveyCounts {
            contents: 1,
            media_images: attached.len(),
            media_images_without_alt: attached
                .iter()
                .filter(|media| media.alt_text().is_empty())
                .count(),
            embedded_images: self.embedded_images.len(),
            embedded_images_without_alt: self
                .embedded_images
                .iter()
                .filter(|image| image.raw_alt().is_empty())
                .count(),
            embedded_images_without_media: self
                .embedded_images
                .iter()
                .filter(|image| image.resolved_media(&self.media).is_none())
                .count(),
            embedded_images_external: self.external_embedded_images().count(),
        }
    }
}

/// Errors raised while loading or reconciling a content record.
#[derive(Debug)]
pub enum ReconcileError {
    /// The body could not be parsed; the record is skipped.
    Parse {
        /// Affected record.
        content_id: ContentId,
        /// Underlying parse failure.
        source: ParseError,
    },
    /// A fragment operation failed on a node handle; an internal invariant broke.
    Fragment(FragmentError),
    /// The store failed while loading the record.
    Store(StoreError),
    /// The record was already reconciled in this process.
    AlreadyReconciled(ContentId),
}

impl ReconcileError {
    /// Whether the batch may skip this record and continue.
    pub fn is_record_scoped(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Store(_))
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { content_id, source } => {
                write!(f, "content {content_id} could not be parsed: {source}")
            }
            Self::Fragment(err) => write!(f, "fragment invariant violated: {err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::AlreadyReconciled(content_id) => {
                write!(f, "content {content_id} was already reconciled")
            }
        }
    }
}

impl Error for ReconcileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse { source, .. } => Some(source),
            Self::Fragment(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::AlreadyReconciled(_) => None,
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<FragmentError> for ReconcileError {
    fn from(err: FragmentError) -> Self {
        Self::Fragment(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MediaId;
    use crate::store::{MemoryStore, RawMedia};
    use pretty_assertions::assert_eq;

    fn raw_content(id: u64, body: &str) -> RawContent {
        RawContent {
            id: ContentId::new(id),
            site_id: SiteId::new(1),
            site_path: "/news/".into(),
            title: format!("Post {id}"),
            body: body.into(),
            status: "publish".into(),
            kind: "post".into(),
            created_at: "2021-05-01 10:00:00".into(),
            modified_at: "2021-05-01 10:00:00".into(),
        }
    }

    fn media(id: u64, parent: Option<u64>, alt: &str, title: &str, path: &str) -> RawMedia {
        RawMedia {
            id: MediaId::new(id),
            parent_id: parent.map(ContentId::new),
            alt_text: alt.into(),
            title: title.into(),
            file_identifier: String::new(),
            storage_path: path.into(),
        }
    }

    fn store_with(content: &RawContent, media_rows: Vec<RawMedia>) -> MemoryStore {
        let mut store = MemoryStore::new();
        store.insert_content(content.clone());
        for row in media_rows {
            store.insert_media(row);
        }
        store
    }

    #[test]
    fn rewrites_alt_from_class_token() {
        let raw = raw_content(
            1,
            r#"<p>text<img src="https://host/uploads/2021/05/dog.jpg" class="wp-image-7" alt=""></p>"#,
        );
        let mut store = store_with(
            &raw,
            vec![media(7, None, "A dog", "", "https://host/uploads/2021/05/dog.jpg")],
        );

        let mut record =
            ContentRecord::load(raw, &store, &FragmentLimits::default()).expect("load");
        let outcome = record.reconcile(&mut store).expect("reconcile");

        assert_eq!(
            outcome,
            ReconcileOutcome {
                changed: true,
                persisted: true
            }
        );
        assert_eq!(
            record.counters(),
            AltCounters {
                updated: 1,
                skipped: 0,
                missing: 0
            }
        );
        assert!(record.content().contains(r#"alt="A dog""#));
        assert!(record.content().starts_with("<p>text<img "));
        assert!(record.content().ends_with("></p>"));
        assert_eq!(store.body(ContentId::new(1)), Some(record.content()));
        assert_eq!(record.embedded_images()[0].raw_alt(), "A dog");
    }

    #[test]
    fn matching_alt_is_skipped_without_persisting() {
        let raw = raw_content(2, r#"<img class="wp-image-7" alt="A dog">"#);
        let mut store = store_with(&raw, vec![media(7, None, "A dog", "", "")]);

        let mut record =
            ContentRecord::load(raw.clone(), &store, &FragmentLimits::default()).expect("load");
        let outcome = record.reconcile(&mut store).expect("reconcile");

        assert!(!outcome.changed);
        assert_eq!(record.counters().skipped, 1);
        assert_eq!(record.content(), raw.body);
        assert!(store.persisted().is_empty());
        assert!(record.report().change.is_none());
    }

    #[test]
    fn missing_only_counts_images_without_any_alt() {
        let raw = raw_content(
            3,
            r#"<img src="https://cdn.example.com/a.jpg"><img src="https://cdn.example.com/b.jpg" alt="Kept">"#,
        );
        let mut store = store_with(&raw, Vec::new());

        let mut record =
            ContentRecord::load(raw, &store, &FragmentLimits::default()).expect("load");
        record.reconcile(&mut store).expect("reconcile");

        assert_eq!(
            record.counters(),
            AltCounters {
                updated: 0,
                skipped: 2,
                missing: 1
            }
        );
        let unresolved: Vec<_> = record
            .unresolved_without_alt()
            .map(EmbeddedImageRef::src)
            .collect();
        assert_eq!(unresolved, vec!["https://cdn.example.com/a.jpg"]);

        let report = record.report();
        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(report.unresolved[0].site_path, "/news/");
        assert_eq!(report.unresolved[0].title, "Post 3");
    }

    #[test]
    fn resolved_media_without_text_counts_as_missing() {
        let raw = raw_content(4, r#"<img class="wp-image-5" src="/x.jpg">"#);
        let mut store = store_with(&raw, vec![media(5, None, "", "", "")]);

        let mut record =
            ContentRecord::load(raw, &store, &FragmentLimits::default()).expect("load");
        record.reconcile(&mut store).expect("reconcile");

        assert_eq!(record.counters().missing, 1);
        assert_eq!(record.unresolved_without_alt().count(), 1);
    }

    #[test]
    fn persistence_failure_is_recorded_and_content_kept() {
        let raw = raw_content(
            5,
            r#"<img src="https://h/wp-content/uploads/2020/02/cat-300x300.jpg">"#,
        );
        let mut store = store_with(
            &raw,
            vec![media(
                11,
                Some(5),
                "",
                "Cat on a mat",
                "https://h/wp-content/uploads/2020/02/cat.jpg",
            )],
        );
        store.fail_persist(ContentId::new(5), vec!["Could not update post in the database".into()]);

        let mut record =
            ContentRecord::load(raw, &store, &FragmentLimits::default()).expect("load");
        let outcome = record.reconcile(&mut store).expect("reconcile");

        assert_eq!(
            outcome,
            ReconcileOutcome {
                changed: true,
                persisted: false
            }
        );
        assert_eq!(record.errors(), ["Could not update post in the database"]);
        assert!(record.content().contains(r#"alt="Cat on a mat""#));
        let change = record.report().change.expect("change");
        assert!(!change.persisted);
        assert_ne!(change.checksum_before, change.checksum_after);
    }

    #[test]
    fn second_pass_is_rejected() {
        let raw = raw_content(6, "<p>no images</p>");
        let mut store = store_with(&raw, Vec::new());
        let mut record =
            ContentRecord::load(raw, &store, &FragmentLimits::default()).expect("load");

        record.reconcile(&mut store).expect("first pass");
        let err = record.reconcile(&mut store).expect_err("second pass");
        assert!(matches!(err, ReconcileError::AlreadyReconciled(id) if id == ContentId::new(6)));
        assert_eq!(record.counters(), AltCounters::default());
    }

    #[test]
    fn oversized_body_is_a_parse_error() {
        let raw = raw_content(7, "<p>long body</p>");
        let store = store_with(&raw, Vec::new());
        let err = ContentRecord::load(raw, &store, &FragmentLimits { max_bytes: 3 })
            .expect_err("too large");
        assert!(err.is_record_scoped());
        assert!(matches!(err, ReconcileError::Parse { content_id, .. } if content_id == ContentId::new(7)));
    }

    #[test]
    fn survey_counts_media_and_images() {
        let raw = raw_content(
            8,
            r#"<img class="wp-image-20" src="/wp-content/uploads/2020/01/a.jpg" alt="A"><img src="https://cdn.example.com/b.jpg">"#,
        );
        let store = store_with(
            &raw,
            vec![
                media(20, Some(8), "A", "", "https://h/wp-content/uploads/2020/01/a.jpg"),
                media(21, Some(8), "", "", "https://h/wp-content/uploads/2020/01/z.jpg"),
            ],
        );
        let record = ContentRecord::load(raw, &store, &FragmentLimits::default()).expect("load");

        assert_eq!(
            record.survey(),
            SurveyCounts {
                contents: 1,
                media_images: 2,
                media_images_without_alt: 1,
                embedded_images: 2,
                embedded_images_without_alt: 1,
                embedded_images_without_media: 1,
                embedded_images_external: 1,
            }
        );
    }
}
