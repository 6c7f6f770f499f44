//! Anchor extraction from served HTML
//!
//! html5ever's tokenizer decides which `<a>` start tags a browser would see,
//! so markup inside comments, scripts and other raw text is never touched.
//! The tokenizer reports no source positions; the input is fed in chunks
//! ending at each `>` so every emitted tag is known to end at a chunk
//! boundary, and the tag's `href` value is then located in the source text.

use std::ops::Range;

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use tracing::debug;

use super::AnchorSet;

/// How an attribute value is delimited in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    Double,
    Single,
    Unquoted,
}

struct Href {
    span: Range<usize>,
    quote: Quote,
    value: String,
    replaced: bool,
}

/// Collects `<a>` start tags and switches the tokenizer into raw text modes
/// the way the tree builder would
#[derive(Default)]
struct AnchorSink {
    anchors: Vec<Tag>,
    markup: bool,
}

impl TokenSink for AnchorSink {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        match token {
            Token::TagToken(tag) => {
                self.markup = true;
                if tag.kind != TagKind::StartTag {
                    return TokenSinkResult::Continue;
                }

                let next = match &*tag.name {
                    "script" => TokenSinkResult::RawData(RawKind::ScriptData),
                    "style" | "xmp" | "iframe" | "noembed" | "noframes" => {
                        TokenSinkResult::RawData(RawKind::Rawtext)
                    }
                    "title" | "textarea" => TokenSinkResult::RawData(RawKind::Rcdata),
                    "plaintext" => TokenSinkResult::Plaintext,
                    _ => TokenSinkResult::Continue,
                };
                if &*tag.name == "a" {
                    self.anchors.push(tag);
                }
                next
            }
            Token::CommentToken(_) | Token::DoctypeToken(_) => {
                self.markup = true;
                TokenSinkResult::Continue
            }
            _ => TokenSinkResult::Continue,
        }
    }
}

/// HTML source with its `<a href>` values exposed as an [`AnchorSet`]
///
/// Only the attribute values are touched; all other bytes are reproduced
/// verbatim by [`HtmlDocument::into_html`].
pub struct HtmlDocument {
    source: String,
    hrefs: Vec<Href>,
}

impl HtmlDocument {
    /// Scan `source` for anchors
    pub fn parse(source: impl Into<String>) -> Self {
        let source = source.into();
        let mut tokenizer = Tokenizer::new(AnchorSink::default(), TokenizerOpts::default());
        let mut queue = BufferQueue::default();
        let mut hrefs = Vec::new();

        // Start of the text that can still hold the next tag
        let mut floor = 0;
        let mut offset = 0;

        for chunk in source.split_inclusive('>') {
            offset += chunk.len();
            queue.push_back(StrTendril::from_slice(chunk));
            let _ = tokenizer.feed(&mut queue);

            for tag in tokenizer.sink.anchors.drain(..) {
                if !tag.attrs.iter().any(|a| &*a.name.local == "href") {
                    continue;
                }
                match locate_href(&source, floor..offset, &tag) {
                    Some(href) => hrefs.push(href),
                    None => debug!("Anchor ending at byte {} not located, left alone", offset),
                }
            }
            if std::mem::take(&mut tokenizer.sink.markup) {
                floor = offset;
            }
        }
        tokenizer.end();

        Self { source, hrefs }
    }

    /// Current `href` values in document order
    pub fn hrefs(&self) -> impl Iterator<Item = &str> {
        self.hrefs.iter().map(|h| h.value.as_str())
    }

    /// Check whether any `href` was replaced
    pub fn is_modified(&self) -> bool {
        self.hrefs.iter().any(|h| h.replaced)
    }

    /// Serialize the document with replaced `href` values spliced in
    pub fn into_html(self) -> String {
        if !self.is_modified() {
            return self.source;
        }

        let mut out = String::with_capacity(self.source.len() + 64 * self.hrefs.len());
        let mut cursor = 0;
        for href in self.hrefs.iter().filter(|h| h.replaced) {
            out.push_str(&self.source[cursor..href.span.start]);
            out.push_str(&encode_value(&href.value, href.quote));
            cursor = href.span.end;
        }
        out.push_str(&self.source[cursor..]);
        out
    }
}

impl AnchorSet for HtmlDocument {
    fn anchor_count(&self) -> usize {
        self.hrefs.len()
    }

    fn href(&self, index: usize) -> &str {
        &self.hrefs[index].value
    }

    fn set_href(&mut self, index: usize, href: String) {
        let entry = &mut self.hrefs[index];
        entry.value = href;
        entry.replaced = true;
    }
}

struct LexedAttr {
    name: String,
    value: Option<(Range<usize>, Quote)>,
}

struct LexedTag {
    name: String,
    attrs: Vec<LexedAttr>,
    end: usize,
}

/// Find the start tag the tokenizer emitted for `tag`, ending at `window.end`,
/// and return the span of its `href` value
///
/// Candidates are tried nearest first; a `<` inside an attribute value of the
/// real tag is rejected because its attribute list differs.
fn locate_href(source: &str, window: Range<usize>, tag: &Tag) -> Option<Href> {
    let value = tag
        .attrs
        .iter()
        .find(|a| &*a.name.local == "href")?
        .value
        .to_string();
    let expected: Vec<&str> = tag.attrs.iter().map(|a| &*a.name.local).collect();

    for (i, _) in source[window.clone()].rmatch_indices('<') {
        let Some(lexed) = lex_start_tag(source, window.start + i) else {
            continue;
        };
        if lexed.end != window.end
            || lexed.name != "a"
            || !lexed.attrs.iter().map(|a| a.name.as_str()).eq(expected.iter().copied())
        {
            continue;
        }

        let (span, quote) = lexed.attrs.into_iter().find(|a| a.name == "href")?.value?;
        return Some(Href {
            span,
            quote,
            value,
            replaced: false,
        });
    }
    None
}

fn is_space(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

/// Lex the start tag opening at `start` following the HTML tag states
///
/// Duplicate attributes are dropped, as the tokenizer drops them.
fn lex_start_tag(source: &str, start: usize) -> Option<LexedTag> {
    let bytes = source.as_bytes();
    let mut i = start + 1;
    if !bytes.get(i)?.is_ascii_alphabetic() {
        return None;
    }

    let name_start = i;
    while i < bytes.len() && !is_space(bytes[i]) && bytes[i] != b'/' && bytes[i] != b'>' {
        i += 1;
    }
    let name = source[name_start..i].to_ascii_lowercase();
    let mut attrs: Vec<LexedAttr> = Vec::new();

    loop {
        while i < bytes.len() && (is_space(bytes[i]) || bytes[i] == b'/') {
            i += 1;
        }
        if *bytes.get(i)? == b'>' {
            return Some(LexedTag {
                name,
                attrs,
                end: i + 1,
            });
        }

        // A leading '=' belongs to the name
        let attr_start = i;
        i += 1;
        while i < bytes.len()
            && !is_space(bytes[i])
            && !matches!(bytes[i], b'/' | b'>' | b'=')
        {
            i += 1;
        }
        let attr_name = source[attr_start..i].to_ascii_lowercase();

        while i < bytes.len() && is_space(bytes[i]) {
            i += 1;
        }
        let mut value = None;
        if bytes.get(i) == Some(&b'=') {
            i += 1;
            while i < bytes.len() && is_space(bytes[i]) {
                i += 1;
            }
            value = Some(match *bytes.get(i)? {
                quote @ (b'"' | b'\'') => {
                    let open = i + 1;
                    let close = open + source[open..].find(char::from(quote))?;
                    i = close + 1;
                    let kind = if quote == b'"' { Quote::Double } else { Quote::Single };
                    (open..close, kind)
                }
                _ => {
                    let open = i;
                    while i < bytes.len() && !is_space(bytes[i]) && bytes[i] != b'>' {
                        i += 1;
                    }
                    (open..i, Quote::Unquoted)
                }
            });
        }

        if !attrs.iter().any(|a| a.name == attr_name) {
            attrs.push(LexedAttr {
                name: attr_name,
                value,
            });
        }
    }
}

/// Escape a value for the delimiter it is written into; unquoted values are
/// written double quoted
fn encode_value(value: &str, quote: Quote) -> String {
    let escaped = value.replace('&', "&amp;");
    match quote {
        Quote::Double => escaped.replace('"', "&quot;"),
        Quote::Single => escaped.replace('\'', "&#39;"),
        Quote::Unquoted => format!("\"{}\"", escaped.replace('"', "&quot;")),
    }
}
