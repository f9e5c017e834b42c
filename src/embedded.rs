//! Images embedded in a content body and their resolution to media records.

use html_fragment::{HtmlFragmentDocument, NodeIndex};

use crate::ids::MediaId;
use crate::media::{MediaHandle, MediaLibrary, MediaRecord};
use crate::store::{ContentStore, StoreError};

/// Class token prefix editors attach to images inserted from the media library.
pub const CLASS_TOKEN_PREFIX: &str = "wp-image-";

/// Path marker present in every locally uploaded image `src`.
pub const LOCAL_UPLOADS_MARKER: &str = "/wp-content/uploads";

/// Parses one class token of the form `wp-image-<id>`.
pub fn parse_class_token(token: &str) -> Option<MediaId> {
    let digits = token.strip_prefix(CLASS_TOKEN_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(MediaId::new)
}

/// First well-formed media id among `classes`.
pub fn media_id_from_classes<'a, I>(classes: I) -> Option<MediaId>
where
    I: IntoIterator<Item = &'a str>,
{
    classes.into_iter().find_map(parse_class_token)
}

/// Which strategy linked an image to its media record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    /// Direct id from a `wp-image-<id>` class token.
    ClassToken,
    /// Attached media whose path fragment occurs in the `src`.
    PathFragment,
}

/// Resolution state of one embedded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Not attempted yet.
    Pending,
    /// Linked to a media record.
    Resolved {
        /// Record inside the owning content's [`MediaLibrary`].
        media: MediaHandle,
        /// Strategy that produced the link.
        tier: MatchTier,
    },
    /// Attempted; no media record matched.
    Unresolved,
}

/// One `<img>` found in a content body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImageRef {
    node: NodeIndex,
    raw_alt: String,
    src: String,
    class_media_id: Option<MediaId>,
    resolution: Resolution,
}

impl EmbeddedImageRef {
    /// Captures the image at `node`, or `None` if `node` is not an element.
    pub fn from_node(doc: &HtmlFragmentDocument, node: NodeIndex) -> Option<Self> {
        let element = doc.element(node)?;
        Some(Self {
            node,
            raw_alt: element.attribute("alt").unwrap_or_default().to_string(),
            src: element.attribute("src").unwrap_or_default().to_string(),
            class_media_id: media_id_from_classes(element.classes()),
            resolution: Resolution::Pending,
        })
    }

    /// Every image of `doc`, in document order.
    pub fn extract_all(doc: &HtmlFragmentDocument) -> Vec<Self> {
        doc.image_nodes()
            .filter_map(|node| Self::from_node(doc, node))
            .collect()
    }

    /// Arena handle of the `<img>` element.
    pub fn node(&self) -> NodeIndex {
        self.node
    }

    /// Current alt attribute (empty when absent).
    pub fn raw_alt(&self) -> &str {
        &self.raw_alt
    }

    /// Current src attribute.
    pub fn src(&self) -> &str {
        &self.src
    }

    /// Media id carried by the class list, if any.
    pub fn class_media_id(&self) -> Option<MediaId> {
        self.class_media_id
    }

    /// Resolution state.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Links this image to a media record; later calls return the first result.
    ///
    /// The class token wins when its id exists in the store. Otherwise the
    /// attached media are scanned for a path fragment contained in `src`.
    pub fn resolve<S>(
        &mut self,
        library: &mut MediaLibrary,
        store: &S,
    ) -> Result<Resolution, StoreError>
    where
        S: ContentStore + ?Sized,
    {
        if self.resolution != Resolution::Pending {
            return Ok(self.resolution);
        }

        if let Some(id) = self.class_media_id {
            let found = library.lookup(id, |id| {
                store
                    .fetch_media(id)
                    .map(|raw| raw.as_ref().map(MediaRecord::from_raw))
            })?;
            if let Some(media) = found {
                self.resolution = Resolution::Resolved {
                    media,
                    tier: MatchTier::ClassToken,
                };
                return Ok(self.resolution);
            }
        }

        self.resolution = match library.match_path(&self.src) {
            Some(media) => Resolution::Resolved {
                media,
                tier: MatchTier::PathFragment,
            },
            None => Resolution::Unresolved,
        };
        Ok(self.resolution)
    }

    /// Linked media record, if resolution succeeded.
    pub fn resolved_media<'l>(&self, library: &'l MediaLibrary) -> Option<&'l MediaRecord> {
        match self.resolution {
            Resolution::Resolved { media, .. } => library.get(media),
            Resolution::Pending | Resolution::Unresolved => None,
        }
    }

    /// Alt text the media library offers for this image, if any.
    pub fn alt_text_from_media_library<'l>(&self, library: &'l MediaLibrary) -> Option<&'l str> {
        self.resolved_media(library)
            .and_then(MediaRecord::candidate_alt_text)
    }

    /// True when the `src` does not point into local uploads.
    pub fn has_external_src(&self) -> bool {
        !self.src.contains(LOCAL_UPLOADS_MARKER)
    }

    pub(crate) fn record_alt_rewrite(&mut self, alt: &str) {
        self.raw_alt.clear();
        self.raw_alt.push_str(alt);
    }
}
