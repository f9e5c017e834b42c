//! Site and multi-site batch drivers for reconciliation and surveys.
//!
//! Record-scoped failures (unparsable bodies, store errors while loading one
//! record) are logged, recorded in the site report, and the batch moves on.
//! Anything else aborts the batch.

use std::error::Error;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::content::{ContentRecord, ReconcileError};
use crate::controls::ReconcileControls;
use crate::ids::SiteId;
use crate::report::{
    BatchReport, RecordError, SiteReport, SiteSurvey, SkipReason, SkippedSite, SurveyCounts,
    SurveyReport,
};
use crate::store::{ContentStore, SiteRecord, StoreError};

/// Which sites a batch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteScope {
    /// One site, regardless of size or skip list.
    Site(SiteId),
    /// Sites below the small-site threshold.
    Small,
    /// Sites below the all-sites ceiling.
    All,
}

impl FromStr for SiteScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "small" => Ok(Self::Small),
            "all" => Ok(Self::All),
            other => other
                .parse::<SiteId>()
                .map(Self::Site)
                .map_err(|_| format!("expected a site id, `small` or `all`, got `{other}`")),
        }
    }
}

impl fmt::Display for SiteScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Site(id) => write!(f, "{id}"),
            Self::Small => f.write_str("small"),
            Self::All => f.write_str("all"),
        }
    }
}

/// Failures that abort a batch.
#[derive(Debug)]
pub enum BatchError {
    /// The requested site is not in the store.
    UnknownSite(SiteId),
    /// The site listing could not be read.
    ListSites(StoreError),
    /// A reconciliation invariant broke.
    Reconcile(ReconcileError),
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSite(id) => write!(f, "site {id} does not exist"),
            Self::ListSites(err) => write!(f, "failed to list sites: {err}"),
            Self::Reconcile(err) => write!(f, "reconciliation aborted: {err}"),
        }
    }
}

impl Error for BatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UnknownSite(_) => None,
            Self::ListSites(err) => Some(err),
            Self::Reconcile(err) => Some(err),
        }
    }
}

impl From<ReconcileError> for BatchError {
    fn from(err: ReconcileError) -> Self {
        Self::Reconcile(err)
    }
}

/// Reconciles every selected record of `site`.
pub fn reconcile_site<S>(
    store: &mut S,
    site: &SiteRecord,
    controls: &ReconcileControls,
) -> Result<SiteReport, BatchError>
where
    S: ContentStore + ?Sized,
{
    let mut report = SiteReport::new(site.id, &site.name, &site.path);
    let rows = match store.fetch_published_content(site.id, controls.query()) {
        Ok(rows) => rows,
        Err(err) => {
            warn!(site_id = %site.id, error = %err, "failed to fetch site content");
            report.errors.push(RecordError {
                content_id: None,
                messages: err.into_messages(),
            });
            return Ok(report);
        }
    };

    for raw in rows {
        let content_id = raw.id;
        let mut record = match ContentRecord::load(raw, &*store, controls.fragment_limits()) {
            Ok(record) => record,
            Err(err) if err.is_record_scoped() => {
                warn!(site_id = %site.id, content_id = %content_id, error = %err, "skipping record");
                report.failed_records += 1;
                report.errors.push(RecordError {
                    content_id: Some(content_id),
                    messages: vec![err.to_string()],
                });
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        record.reconcile(&mut *store)?;
        report.absorb(record.report());
    }

    info!(
        site_id = %site.id,
        site = %site.name,
        records = report.records,
        failed = report.failed_records,
        updated = report.counters.updated,
        skipped = report.counters.skipped,
        missing = report.counters.missing,
        "site reconciled"
    );
    Ok(report)
}

/// Reconciles every site `scope` selects.
pub fn reconcile_sites<S>(
    store: &mut S,
    scope: SiteScope,
    controls: &ReconcileControls,
) -> Result<BatchReport, BatchError>
where
    S: ContentStore + ?Sized,
{
    let sites = store.list_sites().map_err(BatchError::ListSites)?;
    let mut batch = BatchReport::default();

    let ceiling = match scope {
        SiteScope::Site(id) => {
            let site = sites
                .iter()
                .find(|site| site.id == id)
                .ok_or(BatchError::UnknownSite(id))?;
            batch.push_site(reconcile_site(store, site, controls)?);
            return Ok(batch);
        }
        SiteScope::Small => controls.small_site_threshold(),
        SiteScope::All => controls.all_sites_ceiling(),
    };

    for site in &sites {
        if let Some(reason) = skip_reason(site, ceiling, controls) {
            info!(site_id = %site.id, site = %site.name, ?reason, "skipping site");
            batch.skipped.push(SkippedSite {
                site_id: site.id,
                site_name: site.name.clone(),
                reason,
            });
            continue;
        }
        batch.push_site(reconcile_site(store, site, controls)?);
    }

    info!(
        scope = %scope,
        sites = batch.sites.len(),
        skipped = batch.skipped.len(),
        updated = batch.totals.updated,
        skipped_images = batch.totals.skipped,
        missing = batch.totals.missing,
        "batch complete"
    );
    Ok(batch)
}

fn skip_reason(site: &SiteRecord, ceiling: usize, controls: &ReconcileControls) -> Option<SkipReason> {
    if controls.is_skipped(site.id) {
        Some(SkipReason::Excluded)
    } else if site.published_count >= ceiling {
        Some(SkipReason::TooLarge {
            published: site.published_count,
            ceiling,
        })
    } else {
        None
    }
}

/// Read-only audit of one site.
pub fn survey_site<S>(store: &S, site: &SiteRecord, controls: &ReconcileControls) -> SiteSurvey
where
    S: ContentStore + ?Sized,
{
    let mut survey = SiteSurvey {
        site_id: site.id,
        site_name: site.name.clone(),
        counts: SurveyCounts::default(),
        errors: Vec::new(),
    };
    let rows = match store.fetch_published_content(site.id, controls.query()) {
        Ok(rows) => rows,
        Err(err) => {
            warn!(site_id = %site.id, error = %err, "failed to fetch site content");
            survey.errors.push(RecordError {
                content_id: None,
                messages: err.into_messages(),
            });
            return survey;
        }
    };

    for raw in rows {
        let content_id = raw.id;
        match ContentRecord::load(raw, store, controls.fragment_limits()) {
            Ok(record) => survey.counts += record.survey(),
            Err(err) => {
                warn!(site_id = %site.id, content_id = %content_id, error = %err, "skipping record");
                survey.errors.push(RecordError {
                    content_id: Some(content_id),
                    messages: vec![err.to_string()],
                });
            }
        }
    }
    debug!(site_id = %site.id, contents = survey.counts.contents, "site surveyed");
    survey
}

/// Read-only audit of every site outside the skip list.
pub fn survey_sites<S>(store: &S, controls: &ReconcileControls) -> Result<SurveyReport, BatchError>
where
    S: ContentStore + ?Sized,
{
    let sites = store.list_sites().map_err(BatchError::ListSites)?;
    let mut report = SurveyReport::default();
    for site in sites.iter().filter(|site| !controls.is_skipped(site.id)) {
        report.push_site(survey_site(store, site, controls));
    }
    info!(
        sites = report.sites.len(),
        contents = report.totals.contents,
        embedded_images = report.totals.embedded_images,
        "survey complete"
    );
    Ok(report)
}
