//! Snippet filtering shared by the server's filter composer and the client's pickers
//!
//! Folder pickers expose a single selector which lists both tags and language labels.  [SnippetFilter] turns such
//! a selection into two explicit filter fields once, at the boundary, so nothing downstream has to guess what a
//! selection meant.

use crate::{Language, Snippet, SnippetsQuery, Tag, UNTAGGED};

/// Tag and language filters, each optional and independent
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SnippetFilter {
    /// Tag name, matched case-insensitively
    pub tag: Option<String>,

    /// Language, matched exactly
    pub language: Option<Language>,
}

impl SnippetFilter {
    /// Classify a single picker selection.
    ///
    /// A selection exactly equal to a supported language label (e.g. "Java" or "C++") is a language filter, even
    /// if no tag of that name exists.  Anything else is a tag filter.
    pub fn from_selection(selection: Option<&str>) -> Self {
        match selection {
            None => Self::default(),

            Some(selection) => {
                if let Some(language) = Language::from_label(selection) {
                    Self {
                        tag: None,
                        language: Some(language),
                    }
                } else {
                    Self {
                        tag: Some(selection.to_owned()),
                        language: None,
                    }
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tag.is_none() && self.language.is_none()
    }

    /// Build the GET /snippets query for this filter, scoped to `folder` if specified.
    pub fn query(&self, folder: Option<i64>) -> SnippetsQuery {
        SnippetsQuery {
            folder,
            tag: self.tag.clone(),
            language: self.language,
        }
    }
}

/// Key under which tag names are compared: trimmed, then lowercased with full Unicode case mapping.
///
/// The server stores this key in a unique column, so two names with the same key are the same tag everywhere.
pub fn tag_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Return true iff some tag in `tags` has a name which case-insensitively equals `name`.
pub fn has_tag(tags: &[Tag], name: &str) -> bool {
    let key = tag_key(name);

    tags.iter().any(|tag| tag_key(&tag.name) == key)
}

/// Retain only the snippets carrying a tag named `tag` (case-insensitively), preserving order.
///
/// If `tag` is `None`, `snippets` is returned unchanged.
pub fn refine(mut snippets: Vec<Snippet>, tag: Option<&str>) -> Vec<Snippet> {
    if let Some(tag) = tag {
        snippets.retain(|snippet| has_tag(&snippet.tags, tag));
    }

    snippets
}

/// Return the tags which may be offered in a tag picker, i.e. all but the reserved "untagged" tag.
pub fn pickable(tags: &[Tag]) -> impl Iterator<Item = &Tag> {
    tags.iter()
        .filter(|tag| !tag.name.eq_ignore_ascii_case(UNTAGGED))
}
