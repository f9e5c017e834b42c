use altsync::{
    AltCounters, ContentId, ContentRecord, ContentStore, EmbeddedImageRef, MatchTier, MediaId,
    MemoryStore, RawContent, RawMedia, Resolution, SiteId,
};
use html_fragment::{FragmentLimits, HtmlFragmentDocument};
use pretty_assertions::assert_eq;

const GUTENBERG: &str = include_str!("../html-fragment/tests/fixtures/html/gutenberg-blocks.html");
const CLASSIC: &str = include_str!("../html-fragment/tests/fixtures/html/classic-editor.html");

fn content(id: u64, body: &str) -> RawContent {
    RawContent {
        id: ContentId::new(id),
        site_id: SiteId::new(1),
        site_path: "/".into(),
        title: format!("Post {id}"),
        body: body.into(),
        status: "publish".into(),
        kind: "post".into(),
        created_at: "2021-05-01 10:00:00".into(),
        modified_at: "2021-05-01 10:00:00".into(),
    }
}

fn media(id: u64, parent: Option<u64>, alt: &str, title: &str, file: &str, path: &str) -> RawMedia {
    RawMedia {
        id: MediaId::new(id),
        parent_id: parent.map(ContentId::new),
        alt_text: alt.into(),
        title: title.into(),
        file_identifier: file.into(),
        storage_path: path.into(),
    }
}

fn load(store: &MemoryStore, id: u64) -> ContentRecord {
    let raw = store
        .fetch_published_content(SiteId::new(1), &Default::default())
        .expect("fetch")
        .into_iter()
        .find(|row| row.id == ContentId::new(id))
        .expect("row");
    ContentRecord::load(raw, store, &FragmentLimits::default()).expect("load")
}

#[test]
fn end_to_end_dog_scenario() {
    let mut store = MemoryStore::new();
    store.insert_content(content(
        1,
        r#"<p>text<img src="https://host/uploads/2021/05/dog.jpg" class="wp-image-7" alt=""></p>"#,
    ));
    store.insert_media(media(7, None, "A dog", "", "", "https://host/uploads/2021/05/dog.jpg"));

    let mut record = load(&store, 1);
    record.reconcile(&mut store).expect("reconcile");

    assert_eq!(
        record.counters(),
        AltCounters {
            updated: 1,
            skipped: 0,
            missing: 0
        }
    );
    let reparsed = HtmlFragmentDocument::parse(record.content()).expect("reparse");
    assert_eq!(
        reparsed.serialize_canonical(),
        r#"<p>text<img alt="A dog" class="wp-image-7" src="https://host/uploads/2021/05/dog.jpg"></p>"#
    );
}

#[test]
fn reconciling_again_updates_nothing() {
    let mut store = MemoryStore::new();
    store.insert_content(content(
        2,
        r#"<figure><img class="wp-image-7" src="/a.jpg" alt="old"></figure><p><img src="/wp-content/uploads/2020/01/cat-300x300.jpg"></p>"#,
    ));
    store.insert_media(media(7, None, "A dog", "", "", ""));
    store.insert_media(media(
        8,
        Some(2),
        "",
        "",
        "cat",
        "https://h/wp-content/uploads/2020/01/cat.jpg",
    ));

    let mut first = load(&store, 2);
    first.reconcile(&mut store).expect("first");
    assert_eq!(first.counters().updated, 2);

    let mut second = load(&store, 2);
    second.reconcile(&mut store).expect("second");
    assert_eq!(
        second.counters(),
        AltCounters {
            updated: 0,
            skipped: 2,
            missing: 0
        }
    );
    assert_eq!(second.content(), first.content());
    assert_eq!(store.persisted(), &[ContentId::new(2)]);
}

#[test]
fn title_is_used_when_stored_alt_is_empty() {
    let mut store = MemoryStore::new();
    store.insert_content(content(3, r#"<img class="wp-image-9" src="/x.jpg">"#));
    store.insert_media(media(9, None, "", "Harbor at dawn", "harbor-dawn", ""));

    let mut record = load(&store, 3);
    assert_eq!(
        record.embedded_images()[0].alt_text_from_media_library(record.media()),
        Some("Harbor at dawn")
    );
    record.reconcile(&mut store).expect("reconcile");
    assert!(record.content().contains(r#"alt="Harbor at dawn""#));
}

#[test]
fn class_token_wins_over_path_fragment() {
    let mut store = MemoryStore::new();
    store.insert_content(content(
        4,
        r#"<img class="wp-image-42" src="https://h/wp-content/uploads/2019/01/shared-640x480.jpg">"#,
    ));
    store.insert_media(media(42, None, "Forty two", "", "", "https://h/wp-content/uploads/2018/01/other.jpg"));
    store.insert_media(media(
        43,
        Some(4),
        "Path match",
        "",
        "",
        "https://h/wp-content/uploads/2019/01/shared.jpg",
    ));

    let record = load(&store, 4);
    let image: &EmbeddedImageRef = &record.embedded_images()[0];
    assert!(matches!(
        image.resolution(),
        Resolution::Resolved {
            tier: MatchTier::ClassToken,
            ..
        }
    ));
    assert_eq!(
        image.resolved_media(record.media()).map(|media| media.id()),
        Some(MediaId::new(42))
    );
}

#[test]
fn bodies_without_images_are_left_alone() {
    let mut store = MemoryStore::new();
    store.insert_content(content(5, CLASSIC));

    let mut record = load(&store, 5);
    let outcome = record.reconcile(&mut store).expect("reconcile");

    assert!(!outcome.changed);
    assert_eq!(record.content(), CLASSIC);
    assert_eq!(record.counters().images(), 0);
    assert!(store.persisted().is_empty());
}

#[test]
fn block_editor_markup_keeps_its_comments() {
    let mut store = MemoryStore::new();
    store.insert_content(content(6, GUTENBERG));
    store.insert_media(media(
        42,
        Some(6),
        "Front doors of the new library",
        "",
        "",
        "https://blogs.example.edu/wp-content/uploads/2021/05/library.jpg",
    ));

    let mut record = load(&store, 6);
    record.reconcile(&mut store).expect("reconcile");

    assert_eq!(record.counters().updated, 1);
    let expected = GUTENBERG.replace(
        r#"library.jpg">"#,
        r#"library.jpg" alt="Front doors of the new library">"#,
    );
    assert_eq!(record.content(), expected);
}

#[test]
fn rewriting_one_image_leaves_unrelated_markup_intact() {
    let body = concat!(
        "<pre>\n\nfn main() {}</pre>",
        r#"<template><img src="/t.jpg"></template>"#,
        r##"<svg><use xlink:href="#i"></use></svg>"##,
        r#"<img class="wp-image-7" src="/a.jpg">"#,
    );
    let mut store = MemoryStore::new();
    store.insert_content(content(7, body));
    store.insert_media(media(7, None, "A dog", "", "", ""));

    let mut record = load(&store, 7);
    record.reconcile(&mut store).expect("reconcile");

    let expected = body.replace(
        r#"src="/a.jpg">"#,
        r#"src="/a.jpg" alt="A dog">"#,
    );
    assert_eq!(store.body(ContentId::new(7)), Some(expected.as_str()));

    let mut again = load(&store, 7);
    again.reconcile(&mut store).expect("second pass");
    assert_eq!(again.counters().updated, 0);
    assert_eq!(store.body(ContentId::new(7)), Some(expected.as_str()));
}
