//! Counters, report rows and ledgers produced by reconciliation and surveys.

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

use crate::ids::{ContentId, SiteId};

/// Per-pass alt-text outcome counters.
///
/// Every embedded image lands in exactly one of `updated` or `skipped`;
/// `missing` counts the skipped images that also have no alt text at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AltCounters {
    /// Alt attribute rewritten from the media library.
    pub updated: usize,
    /// Left untouched (already compliant or no library text).
    pub skipped: usize,
    /// Skipped and still without any alt text.
    pub missing: usize,
}

impl AltCounters {
    /// Images accounted for in this pass.
    pub fn images(&self) -> usize {
        self.updated + self.skipped
    }
}

impl AddAssign for AltCounters {
    fn add_assign(&mut self, other: Self) {
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.missing += other.missing;
    }
}

/// One embedded image without usable alt text from any source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedImage {
    /// Owning site.
    pub site_id: SiteId,
    /// Path prefix of the owning site.
    pub site_path: String,
    /// Owning content record.
    pub content_id: ContentId,
    /// Title of the owning content record.
    pub title: String,
    /// Image source.
    pub src: String,
}

/// Before/after digest of one persisted body, appended to the change ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Owning site.
    pub site_id: SiteId,
    /// Changed content record.
    pub content_id: ContentId,
    /// CRC32 of the body before reconciliation.
    pub checksum_before: u32,
    /// CRC32 of the re-serialized body.
    pub checksum_after: u32,
    /// Alt attributes rewritten.
    pub updated: usize,
    /// Whether the store accepted the new body.
    pub persisted: bool,
    /// Epoch milliseconds when the change was produced.
    pub emitted_at_epoch_ms: u64,
}

/// CRC32 checksum of a body, as recorded in [`ChangeRecord`].
pub fn body_checksum(body: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body.as_bytes());
    hasher.finalize()
}

/// Everything one content record's reconciliation pass produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Owning site.
    pub site_id: SiteId,
    /// Reconciled content record.
    pub content_id: ContentId,
    /// Outcome counters.
    pub counters: AltCounters,
    /// Images left without any alt text.
    pub unresolved: Vec<UnresolvedImage>,
    /// Persistence error messages, in order.
    pub errors: Vec<String>,
    /// Change digest when the body was rewritten.
    pub change: Option<ChangeRecord>,
}

/// Errors attributed to one content record inside a site run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    /// Affected content record, if the failure was record-scoped.
    pub content_id: Option<ContentId>,
    /// Messages in the order they were produced.
    pub messages: Vec<String>,
}

/// Roll-up of every record reconciled for one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteReport {
    /// Site identifier.
    pub site_id: SiteId,
    /// Display name.
    pub site_name: String,
    /// Path prefix.
    pub site_path: String,
    /// Records reconciled.
    pub records: usize,
    /// Records skipped because they could not be loaded.
    pub failed_records: usize,
    /// Summed counters.
    pub counters: AltCounters,
    /// Images without alt text across the site.
    pub unresolved: Vec<UnresolvedImage>,
    /// Record and site level errors.
    pub errors: Vec<RecordError>,
    /// Change digests of rewritten records.
    pub changes: Vec<ChangeRecord>,
}

impl SiteReport {
    /// Empty report for a site.
    pub fn new(site_id: SiteId, site_name: &str, site_path: &str) -> Self {
        Self {
            site_id,
            site_name: site_name.to_string(),
            site_path: site_path.to_string(),
            records: 0,
            failed_records: 0,
            counters: AltCounters::default(),
            unresolved: Vec::new(),
            errors: Vec::new(),
            changes: Vec::new(),
        }
    }

    /// Folds one record's report into the site totals.
    pub fn absorb(&mut self, report: ReconciliationReport) {
        self.records += 1;
        self.counters += report.counters;
        self.unresolved.extend(report.unresolved);
        if !report.errors.is_empty() {
            self.errors.push(RecordError {
                content_id: Some(report.content_id),
                messages: report.errors,
            });
        }
        if let Some(change) = report.change {
            self.changes.push(change);
        }
    }
}

/// Why a site was left out of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Listed in the configured skip list.
    Excluded,
    /// Published count at or above the scope ceiling.
    TooLarge {
        /// Published content count.
        published: usize,
        /// Ceiling in force.
        ceiling: usize,
    },
}

/// A site left out of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSite {
    /// Site identifier.
    pub site_id: SiteId,
    /// Display name.
    pub site_name: String,
    /// Why it was skipped.
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Roll-up across sites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Per-site reports in processing order.
    pub sites: Vec<SiteReport>,
    /// Sites left out.
    pub skipped: Vec<SkippedSite>,
    /// Counters summed over every site.
    pub totals: AltCounters,
}

impl BatchReport {
    /// Adds a site report and folds its counters into the totals.
    pub fn push_site(&mut self, report: SiteReport) {
        self.totals += report.counters;
        self.sites.push(report);
    }

    /// Every unresolved image across sites.
    pub fn unresolved(&self) -> impl Iterator<Item = &UnresolvedImage> {
        self.sites.iter().flat_map(|site| site.unresolved.iter())
    }

    /// Every change digest across sites.
    pub fn changes(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.sites.iter().flat_map(|site| site.changes.iter())
    }
}

/// Read-only audit counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyCounts {
    /// Content records surveyed.
    pub contents: usize,
    /// Attached media records.
    pub media_images: usize,
    /// Attached media with empty stored alt text.
    pub media_images_without_alt: usize,
    /// Embedded images.
    pub embedded_images: usize,
    /// Embedded images with empty alt attribute.
    pub embedded_images_without_alt: usize,
    /// Embedded images no media record resolved to.
    pub embedded_images_without_media: usize,
    /// Embedded images not served from local uploads.
    pub embedded_images_external: usize,
}

impl AddAssign for SurveyCounts {
    fn add_assign(&mut self, other: Self) {
        self.contents += other.contents;
        self.media_images += other.media_images;
        self.media_images_without_alt += other.media_images_without_alt;
        self.embedded_images += other.embedded_images;
        self.embedded_images_without_alt += other.embedded_images_without_alt;
        self.embedded_images_without_media += other.embedded_images_without_media;
        self.embedded_images_external += other.embedded_images_external;
    }
}

/// Survey of one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteSurvey {
    /// Site identifier.
    pub site_id: SiteId,
    /// Display name.
    pub site_name: String,
    /// Summed counts.
    pub counts: SurveyCounts,
    /// Records that could not be loaded.
    pub errors: Vec<RecordError>,
}

/// Surveys of every site plus the aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SurveyReport {
    /// Per-site surveys in processing order.
    pub sites: Vec<SiteSurvey>,
    /// Counts summed over every site.
    pub totals: SurveyCounts,
}

impl SurveyReport {
    /// Adds a site survey and folds its counts into the totals.
    pub fn push_site(&mut self, survey: SiteSurvey) {
        self.totals += survey.counts;
        self.sites.push(survey);
    }
}
