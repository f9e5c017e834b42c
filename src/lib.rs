#![warn(missing_docs)]
//! Core library entry points for the altsync alt-text reconciler.
//!
//! A [`ContentRecord`] parses one stored body into an
//! [`HtmlFragmentDocument`](html_fragment::HtmlFragmentDocument), links each
//! embedded image to a media-library record and copies the library's alt text
//! into the markup. [`batch`] drives that over sites through a [`ContentStore`].

pub mod batch;
pub mod content;
pub mod controls;
pub mod embedded;
pub mod ids;
pub mod mangled;
pub mod media;
pub mod report;
pub mod store;

pub use batch::{
    reconcile_site, reconcile_sites, survey_site, survey_sites, BatchError, SiteScope,
};
pub use content::{ContentRecord, ReconcileError, ReconcileOutcome};
pub use controls::{ControlArgs, ReconcileControls};
pub use embedded::{EmbeddedImageRef, MatchTier, Resolution};
pub use ids::{ContentId, MediaId, SiteId};
pub use mangled::{scan_body, scan_site, MangledContent, ManglingMarker};
pub use media::{MediaHandle, MediaLibrary, MediaRecord};
pub use report::{
    AltCounters, BatchReport, ChangeRecord, ReconciliationReport, SiteReport, SurveyCounts,
    SurveyReport, UnresolvedImage,
};
pub use store::{
    ContentQuery, ContentStore, DryRunStore, JsonlStore, MemoryStore, RawContent, RawMedia,
    SiteRecord, SortOrder, StoreError,
};
