//! Link rebasing

use tracing::debug;
use url::Url;

use crate::namespace::{ReplayNamespace, ReplayPrefix};

/// Mutable collection of hyperlink targets on a page
pub trait AnchorSet {
    /// Number of anchors
    fn anchor_count(&self) -> usize;

    /// Raw `href` of anchor `index`
    fn href(&self, index: usize) -> &str;

    /// Replace the `href` of anchor `index`
    fn set_href(&mut self, index: usize, href: String);
}

impl AnchorSet for Vec<String> {
    fn anchor_count(&self) -> usize {
        self.len()
    }

    fn href(&self, index: usize) -> &str {
        &self[index]
    }

    fn set_href(&mut self, index: usize, href: String) {
        self[index] = href;
    }
}

/// Rebases same-origin links of a replayed page into its replay namespace
#[derive(Debug, Clone, Default)]
pub struct LinkRewriter {
    replay: ReplayNamespace,
}

impl LinkRewriter {
    /// Create a link rewriter for a replay namespace
    pub fn new(replay: ReplayNamespace) -> Self {
        Self { replay }
    }

    /// Namespace prefix of a page, `None` if the page is not a replay page
    pub fn prefix_for(&self, page_url: &Url) -> Option<ReplayPrefix> {
        self.replay.page_prefix(page_url.path())
    }

    /// Rewrite one link target
    ///
    /// Returns `None` when the link is left alone: it does not resolve, it
    /// points to another origin, or it is already inside the replay namespace.
    /// The prefix is inserted in front of the path as written, so scheme,
    /// authority, query, fragment and path encoding are kept. Document-relative
    /// links that climb out of the namespace are rewritten from their resolved
    /// root-relative form.
    pub fn rewrite_href(&self, prefix: &ReplayPrefix, page_url: &Url, href: &str) -> Option<String> {
        let href = href.trim();
        let resolved = page_url.join(href).ok()?;
        if resolved.origin() != page_url.origin() || self.replay.contains(resolved.path()) {
            return None;
        }

        let Some(at) = path_offset(href) else {
            let mut rewritten = format!("{}{}", prefix.as_path(), resolved.path());
            if let Some(query) = resolved.query() {
                rewritten.push('?');
                rewritten.push_str(query);
            }
            if let Some(fragment) = resolved.fragment() {
                rewritten.push('#');
                rewritten.push_str(fragment);
            }
            return Some(rewritten);
        };

        let (head, rest) = href.split_at(at);
        let slash = if rest.starts_with('/') { "" } else { "/" };
        Some(format!("{head}{}{slash}{rest}", prefix.as_path()))
    }

    /// Rewrite every anchor of a page, returning how many changed
    ///
    /// Does nothing if the page itself is not in the replay namespace. Running
    /// the pass again on its own output changes nothing.
    pub fn rewrite_page<A: AnchorSet + ?Sized>(&self, page_url: &Url, anchors: &mut A) -> usize {
        let Some(prefix) = self.prefix_for(page_url) else {
            debug!("Not a replay page, leaving links alone: {}", page_url);
            return 0;
        };

        let mut rewritten = 0;
        for index in 0..anchors.anchor_count() {
            if let Some(href) = self.rewrite_href(&prefix, page_url, anchors.href(index)) {
                anchors.set_href(index, href);
                rewritten += 1;
            }
        }

        debug!("Rewrote {} links on {}", rewritten, page_url);
        rewritten
    }
}

/// Byte offset where the path of a root-relative, scheme-relative or
/// absolute hierarchical href starts; `None` for document-relative hrefs
fn path_offset(href: &str) -> Option<usize> {
    if href.starts_with('/') && !href.starts_with("//") {
        return Some(0);
    }

    let authority = if href.starts_with("//") {
        2
    } else {
        let colon = href.find(':')?;
        let scheme = &href[..colon];
        let valid = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid || !href[colon + 1..].starts_with("//") {
            return None;
        }
        colon + 3
    };

    Some(
        href[authority..]
            .find(['/', '?', '#'])
            .map_or(href.len(), |i| authority + i),
    )
}
