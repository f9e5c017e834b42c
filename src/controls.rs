//! Batch thresholds, skip list and query defaults shared by the binaries.

use clap::{Args, ValueEnum};
use html_fragment::FragmentLimits;

use crate::ids::SiteId;
use crate::store::{ContentQuery, SortOrder};

/// Knobs that bound a reconciliation batch, built once and passed down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileControls {
    small_site_threshold: usize,
    all_sites_ceiling: usize,
    skip_sites: Vec<SiteId>,
    fragment_limits: FragmentLimits,
    query: ContentQuery,
}

impl ReconcileControls {
    /// Constructs a new set of reconcile controls.
    pub fn new(
        small_site_threshold: usize,
        all_sites_ceiling: usize,
        skip_sites: Vec<SiteId>,
        fragment_limits: FragmentLimits,
        query: ContentQuery,
    ) -> Self {
        Self {
            small_site_threshold,
            all_sites_ceiling,
            skip_sites,
            fragment_limits,
            query,
        }
    }

    /// Sites with fewer published records than this count as small.
    pub fn small_site_threshold(&self) -> usize {
        self.small_site_threshold
    }

    /// Sites at or above this many published records are left out of `all`.
    pub fn all_sites_ceiling(&self) -> usize {
        self.all_sites_ceiling
    }

    /// Sites never reconciled in multi-site batches.
    pub fn skip_sites(&self) -> &[SiteId] {
        &self.skip_sites
    }

    /// Whether `site` is on the skip list.
    pub fn is_skipped(&self, site: SiteId) -> bool {
        self.skip_sites.contains(&site)
    }

    /// Parse limits applied to every body.
    pub fn fragment_limits(&self) -> &FragmentLimits {
        &self.fragment_limits
    }

    /// Content selection handed to the store.
    pub fn query(&self) -> &ContentQuery {
        &self.query
    }
}

impl Default for ReconcileControls {
    fn default() -> Self {
        Self {
            small_site_threshold: 1_000,
            all_sites_ceiling: 10_000,
            skip_sites: vec![SiteId::new(18)],
            fragment_limits: FragmentLimits::default(),
            query: ContentQuery::default(),
        }
    }
}

/// Ordering accepted on the command line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum SortOrderArg {
    /// Newest creation time first.
    Newest,
    /// Oldest creation time first.
    Oldest,
}

impl From<SortOrderArg> for SortOrder {
    fn from(value: SortOrderArg) -> Self {
        match value {
            SortOrderArg::Newest => SortOrder::NewestFirst,
            SortOrderArg::Oldest => SortOrder::OldestFirst,
        }
    }
}

/// Command-line flags shared by binaries that run reconciliation batches.
#[derive(Args, Debug, Clone)]
pub struct ControlArgs {
    /// Published-record threshold below which a site counts as small
    #[arg(long, env = "ALTSYNC_SMALL_THRESHOLD", default_value_t = 1_000)]
    pub small_threshold: usize,

    /// Published-record ceiling for the `all` scope
    #[arg(long, env = "ALTSYNC_ALL_CEILING", default_value_t = 10_000)]
    pub all_ceiling: usize,

    /// Site ids to skip in multi-site batches, comma separated
    #[arg(long, env = "ALTSYNC_SKIP_SITES", default_value = "18")]
    pub skip_sites: String,

    /// Largest body accepted by the fragment parser, in bytes
    #[arg(long, env = "ALTSYNC_MAX_BODY_BYTES", default_value_t = FragmentLimits::default().max_bytes)]
    pub max_body_bytes: usize,

    /// Publication status to select
    #[arg(long, env = "ALTSYNC_STATUS", default_value = "publish")]
    pub status: String,

    /// Content kinds to select, comma separated
    #[arg(long, env = "ALTSYNC_KINDS", default_value = "post")]
    pub kinds: String,

    /// Ordering of records inside a site
    #[arg(long, env = "ALTSYNC_ORDER", value_enum, default_value = "newest")]
    pub order: SortOrderArg,

    /// Maximum records per site (0 = all)
    #[arg(long, env = "ALTSYNC_LIMIT", default_value_t = 0)]
    pub limit: usize,
}

impl ControlArgs {
    /// Converts the parsed flags into `ReconcileControls`.
    pub fn build_controls(&self) -> Result<ReconcileControls, String> {
        let query = ContentQuery {
            status: self.status.trim().to_string(),
            kinds: split_list(&self.kinds),
            order: self.order.into(),
            limit: (self.limit > 0).then_some(self.limit),
        };
        Ok(ReconcileControls::new(
            self.small_threshold,
            self.all_ceiling,
            self.skip_sites_vec()?,
            FragmentLimits {
                max_bytes: self.max_body_bytes,
            },
            query,
        ))
    }

    fn skip_sites_vec(&self) -> Result<Vec<SiteId>, String> {
        split_list(&self.skip_sites)
            .iter()
            .map(|raw| {
                raw.parse::<SiteId>()
                    .map_err(|err| format!("invalid site id `{raw}` in skip list: {err}"))
            })
            .collect()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
