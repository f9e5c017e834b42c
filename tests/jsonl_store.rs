use std::fs;
use std::path::Path;

use altsync::store::{CONTENT_FILE, JOURNAL_FILE, MEDIA_FILE, SITES_FILE};
use altsync::{
    reconcile_sites, scan_site, survey_sites, AltCounters, ContentId, ContentStore, DryRunStore,
    JsonlStore, ManglingMarker, ReconcileControls, SiteId, SiteScope, SurveyCounts,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const FIXTURE_SITES: &str = include_str!("fixtures/store/sites.jsonl");
const FIXTURE_CONTENT: &str = include_str!("fixtures/store/content.jsonl");
const FIXTURE_MEDIA: &str = include_str!("fixtures/store/media.jsonl");

fn seeded_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), SITES_FILE, FIXTURE_SITES);
    write(dir.path(), CONTENT_FILE, FIXTURE_CONTENT);
    write(dir.path(), MEDIA_FILE, FIXTURE_MEDIA);
    dir
}

fn write(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).expect("write fixture");
}

fn journal_lines(dir: &Path) -> usize {
    fs::read_to_string(dir.join(JOURNAL_FILE))
        .map(|text| text.lines().filter(|line| !line.trim().is_empty()).count())
        .unwrap_or(0)
}

#[test]
fn lists_sites_with_published_counts() {
    let dir = seeded_dir();
    let store = JsonlStore::open(dir.path()).expect("open");
    let counts: Vec<_> = store
        .list_sites()
        .expect("sites")
        .into_iter()
        .map(|site| (site.id.get(), site.published_count))
        .collect();
    assert_eq!(counts, vec![(1, 4), (2, 1), (18, 1)]);
}

#[test]
fn fix_all_persists_through_the_journal() {
    let dir = seeded_dir();
    let mut store = JsonlStore::open(dir.path()).expect("open");
    let batch = reconcile_sites(&mut store, SiteScope::All, &ReconcileControls::default())
        .expect("batch");

    assert_eq!(
        batch.totals,
        AltCounters {
            updated: 2,
            skipped: 2,
            missing: 1
        }
    );
    assert_eq!(batch.sites.len(), 2);
    assert_eq!(batch.skipped.len(), 1);
    assert_eq!(batch.skipped[0].site_id, SiteId::new(18));

    let unresolved: Vec<_> = batch.unresolved().map(|row| row.src.as_str()).collect();
    assert_eq!(unresolved, vec!["https://cdn.example.org/stock.jpg"]);
    let changed: Vec<_> = batch.changes().map(|change| change.content_id).collect();
    assert_eq!(changed, vec![ContentId::new(12), ContentId::new(11)]);
    assert!(batch.changes().all(|change| change.persisted));

    assert_eq!(journal_lines(dir.path()), 2);
    assert_eq!(
        fs::read_to_string(dir.path().join(CONTENT_FILE)).expect("content"),
        FIXTURE_CONTENT
    );

    let reopened = JsonlStore::open(dir.path()).expect("reopen");
    let sunset = reopened.body(ContentId::new(11)).expect("body");
    assert!(sunset.contains(r#"alt="Sunset over the lake""#));
    assert!(sunset.starts_with(r#"<!-- wp:image {"id":101} -->"#));
    assert!(sunset.ends_with("<p>Evening &amp; lake.</p>"));
    let quad = reopened.body(ContentId::new(12)).expect("body");
    assert!(quad.contains(r#"alt="Campus quad in spring""#));
    assert!(quad.contains(r#"alt="Already right""#));
    assert!(!quad.contains(html_fragment::CONTAINER_MARKER));
}

#[test]
fn second_run_updates_nothing() {
    let dir = seeded_dir();
    let controls = ReconcileControls::default();
    {
        let mut store = JsonlStore::open(dir.path()).expect("open");
        reconcile_sites(&mut store, SiteScope::All, &controls).expect("first run");
    }

    let mut store = JsonlStore::open(dir.path()).expect("reopen");
    let batch = reconcile_sites(&mut store, SiteScope::All, &controls).expect("second run");
    assert_eq!(
        batch.totals,
        AltCounters {
            updated: 0,
            skipped: 4,
            missing: 1
        }
    );
    assert_eq!(batch.changes().count(), 0);
    assert_eq!(journal_lines(dir.path()), 2);
}

#[test]
fn dry_run_leaves_the_export_untouched() {
    let dir = seeded_dir();
    let store = JsonlStore::open(dir.path()).expect("open");
    let mut dry = DryRunStore::new(&store);
    let batch = reconcile_sites(&mut dry, SiteScope::Site(SiteId::new(1)), &ReconcileControls::default())
        .expect("batch");

    assert_eq!(batch.totals.updated, 2);
    assert!(!dir.path().join(JOURNAL_FILE).exists());
    assert_eq!(
        store.body(ContentId::new(13)),
        Some(r#"<p><img src="https://cdn.example.org/stock.jpg"></p>"#)
    );
}

#[test]
fn survey_counts_the_export() {
    let dir = seeded_dir();
    let store = JsonlStore::open(dir.path()).expect("open");
    let report = survey_sites(&store, &ReconcileControls::default()).expect("survey");

    assert_eq!(
        report.totals,
        SurveyCounts {
            contents: 5,
            media_images: 2,
            media_images_without_alt: 1,
            embedded_images: 4,
            embedded_images_without_alt: 2,
            embedded_images_without_media: 1,
            embedded_images_external: 1,
        }
    );
    assert!(!dir.path().join(JOURNAL_FILE).exists());
}

#[test]
fn mangled_scan_flags_leaked_artifacts() {
    let dir = seeded_dir();
    let store = JsonlStore::open(dir.path()).expect("open");
    let sites = store.list_sites().expect("sites");
    let found = scan_site(&store, &sites[0], ReconcileControls::default().query()).expect("scan");

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].content_id, ContentId::new(15));
    assert_eq!(found[0].site_path, "/");
    assert_eq!(
        found[0].markers,
        vec![ManglingMarker::XmlProlog, ManglingMarker::LeakedWrapper]
    );
}

#[test]
fn malformed_rows_are_reported_with_location() {
    let dir = seeded_dir();
    write(dir.path(), MEDIA_FILE, "{\"id\": 1}\nnot json\n");
    let err = JsonlStore::open(dir.path()).expect_err("malformed");
    assert!(err.messages()[0].contains("media.jsonl:2"));
}

#[test]
fn journal_entries_for_missing_content_are_skipped() {
    let dir = seeded_dir();
    write(
        dir.path(),
        JOURNAL_FILE,
        concat!(
            r#"{"content_id":999,"body":"<p>gone</p>","written_at_epoch_ms":1}"#,
            "\n",
            r#"{"content_id":13,"body":"<p>kept</p>","written_at_epoch_ms":2}"#,
            "\n",
        ),
    );

    let store = JsonlStore::open(dir.path()).expect("open");
    assert_eq!(store.orphaned_entries(), 1);
    assert_eq!(store.body(ContentId::new(13)), Some("<p>kept</p>"));
    assert_eq!(store.body(ContentId::new(999)), None);
}
