//! Detection of bodies damaged by an earlier serializer that leaked document
//! scaffolding into stored content. Detection only; nothing is repaired.

use serde::Serialize;
use tracing::debug;

use crate::ids::{ContentId, SiteId};
use crate::store::{ContentQuery, ContentStore, SiteRecord, StoreError};

/// Wrapper class the earlier serializer put around every body it rewrote.
pub const LEGACY_WRAPPER_CLASS: &str = "tmp-post-wrap";

/// Sites with more mangled records than this get their own report file.
pub const OWN_REPORT_THRESHOLD: usize = 10;

/// File stem collecting mangled records of sites under [`OWN_REPORT_THRESHOLD`].
pub const SHARED_REPORT_STEM: &str = "other";

/// One artifact a mangled body can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManglingMarker {
    /// An XML prolog such as `<?xml version="1.0" standalone="yes"?>`.
    XmlProlog,
    /// A synthetic parse wrapper that was serialized along with the content.
    LeakedWrapper,
    /// `<html>`, `<body>` or a doctype inside the fragment.
    DocumentScaffolding,
}

const SCAFFOLDING_TAGS: [&str; 3] = ["<html", "<body", "<!doctype"];

/// Markers present in `body`, in declaration order.
pub fn scan_body(body: &str) -> Vec<ManglingMarker> {
    let lowered = body.to_ascii_lowercase();
    let mut markers = Vec::new();
    if lowered.contains("<?xml") {
        markers.push(ManglingMarker::XmlProlog);
    }
    if lowered.contains(LEGACY_WRAPPER_CLASS) || lowered.contains(html_fragment::CONTAINER_MARKER)
    {
        markers.push(ManglingMarker::LeakedWrapper);
    }
    if SCAFFOLDING_TAGS.iter().any(|tag| lowered.contains(tag)) {
        markers.push(ManglingMarker::DocumentScaffolding);
    }
    markers
}

/// A content record whose body carries at least one [`ManglingMarker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MangledContent {
    /// Owning site.
    pub site_id: SiteId,
    /// Path prefix of the owning site.
    pub site_path: String,
    /// Affected record.
    pub content_id: ContentId,
    /// Record creation timestamp.
    pub created_at: String,
    /// Record modification timestamp.
    pub modified_at: String,
    /// Record title.
    pub title: String,
    /// Artifacts found.
    pub markers: Vec<ManglingMarker>,
}

/// Scans every record `query` selects on `site`.
pub fn scan_site<S>(
    store: &S,
    site: &SiteRecord,
    query: &ContentQuery,
) -> Result<Vec<MangledContent>, StoreError>
where
    S: ContentStore + ?Sized,
{
    let rows = store.fetch_published_content(site.id, query)?;
    let scanned = rows.len();
    let mangled: Vec<MangledContent> = rows
        .into_iter()
        .filter_map(|row| {
            let markers = scan_body(&row.body);
            (!markers.is_empty()).then(|| MangledContent {
                site_id: row.site_id,
                site_path: row.site_path,
                content_id: row.id,
                created_at: row.created_at,
                modified_at: row.modified_at,
                title: row.title,
                markers,
            })
        })
        .collect();
    debug!(
        site_id = %site.id,
        scanned,
        mangled = mangled.len(),
        "site scanned for mangled content"
    );
    Ok(mangled)
}

/// Report file stem for a site: its path without slashes, or `site-<id>`.
pub fn site_report_stem(site: &SiteRecord) -> String {
    let slug: String = site
        .path
        .trim_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if slug.is_empty() {
        format!("site-{}", site.id)
    } else {
        slug
    }
}

/// Groups per-site scan results into report files.
///
/// Sites over [`OWN_REPORT_THRESHOLD`] get a file of their own; the rest share
/// [`SHARED_REPORT_STEM`], which is always present even when empty.
pub fn group_reports(
    per_site: Vec<(SiteRecord, Vec<MangledContent>)>,
) -> Vec<(String, Vec<MangledContent>)> {
    let mut files = Vec::new();
    let mut shared = Vec::new();
    for (site, rows) in per_site {
        if rows.len() > OWN_REPORT_THRESHOLD {
            files.push((site_report_stem(&site), rows));
        } else {
            shared.extend(rows);
        }
    }
    files.push((SHARED_REPORT_STEM.to_string(), shared));
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RawContent};
    use pretty_assertions::assert_eq;

    fn site(id: u64, path: &str) -> SiteRecord {
        SiteRecord {
            id: SiteId::new(id),
            name: format!("Site {id}"),
            path: path.to_string(),
            published_count: 0,
        }
    }

    fn row(id: u64, site: u64, body: &str) -> RawContent {
        RawContent {
            id: ContentId::new(id),
            site_id: SiteId::new(site),
            site_path: String::new(),
            title: format!("Post {id}"),
            body: body.to_string(),
            status: "publish".into(),
            kind: "post".into(),
            created_at: "2017-03-01 09:00:00".into(),
            modified_at: "2017-03-02 09:00:00".into(),
        }
    }

    fn mangled_row(id: u64) -> MangledContent {
        MangledContent {
            site_id: SiteId::new(1),
            site_path: "/".into(),
            content_id: ContentId::new(id),
            created_at: String::new(),
            modified_at: String::new(),
            title: String::new(),
            markers: vec![ManglingMarker::XmlProlog],
        }
    }

    #[test]
    fn detects_each_marker() {
        assert_eq!(
            scan_body(r#"<?xml version="1.0" standalone="yes"?><div class="tmp-post-wrap"><p>x</p></div>"#),
            vec![ManglingMarker::XmlProlog, ManglingMarker::LeakedWrapper]
        );
        assert_eq!(
            scan_body("<!DOCTYPE html><HTML><Body><p>x</p></Body></HTML>"),
            vec![ManglingMarker::DocumentScaffolding]
        );
        assert_eq!(
            scan_body(r#"<div data-html-fragment-wrap=""><p>x</p></div>"#),
            vec![ManglingMarker::LeakedWrapper]
        );
    }

    #[test]
    fn clean_bodies_have_no_markers() {
        assert!(scan_body(r#"<p>Plain <img src="/a.jpg" alt="a"></p>"#).is_empty());
    }

    #[test]
    fn scan_site_keeps_only_mangled_rows() {
        let mut store = MemoryStore::new();
        store.insert_site(site(2, "/law/"));
        store.insert_content(row(1, 2, "<p>fine</p>"));
        store.insert_content(row(2, 2, r#"<?xml version="1.0" standalone="yes"?><p>bad</p>"#));

        let found = scan_site(&store, &site(2, "/law/"), &ContentQuery::default()).expect("scan");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content_id, ContentId::new(2));
        assert_eq!(found[0].site_path, "/law/");
        assert_eq!(found[0].modified_at, "2017-03-02 09:00:00");
    }

    #[test]
    fn large_sites_get_their_own_report() {
        let big: Vec<_> = (1..=11).map(mangled_row).collect();
        let small = vec![mangled_row(50), mangled_row(51)];
        let grouped = group_reports(vec![(site(3, "/arts/"), big), (site(4, "/"), small)]);

        let summary: Vec<_> = grouped
            .iter()
            .map(|(stem, rows)| (stem.as_str(), rows.len()))
            .collect();
        assert_eq!(summary, vec![("arts", 11), ("other", 2)]);
        assert_eq!(site_report_stem(&site(4, "/")), "site-4");
        assert_eq!(site_report_stem(&site(5, "/grad/law/")), "grad-law");
    }
}
