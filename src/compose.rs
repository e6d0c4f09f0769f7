use std::sync::LazyLock;

use html_escape::{encode_double_quoted_attribute, encode_text};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::config::Publish;
use crate::model::NewEntry;
use crate::readwise::{Book, Category, Highlight};
use crate::tags::Routed;

pub const POST_FORMAT: &str = "standard";

static RE_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)</?[a-z!][^>]*>").expect("valid tag regex"));

#[derive(Debug, Clone)]
pub struct ComposeOptions {
    pub author_id: i64,
    pub marketplace_search_url: String,
}

impl From<&Publish> for ComposeOptions {
    fn from(cfg: &Publish) -> Self {
        Self {
            author_id: cfg.author_id,
            marketplace_search_url: cfg.marketplace_search_url.clone(),
        }
    }
}

pub fn strip_tags(s: &str) -> String {
    RE_TAGS.replace_all(s, "").trim().to_string()
}

/// Link target for the collection: a marketplace search for books, the source otherwise.
pub fn link_for(book: &Book, author: &str, opts: &ComposeOptions) -> Option<String> {
    match book.category {
        Category::Book => {
            let query = format!("{} {}", book.title, author);
            Some(format!(
                "{}{}",
                opts.marketplace_search_url,
                urlencoding::encode(query.trim())
            ))
        }
        _ => book
            .source_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string),
    }
}

fn page_qualifier(book: &Book, highlight: &Highlight) -> Option<String> {
    if book.category != Category::Book {
        return None;
    }
    let location = strip_tags(highlight.location.as_deref()?);
    // "0" counts as no location
    if location.is_empty() || location == "0" {
        return None;
    }
    Some(format!("page {}", location))
}

pub fn render_body(book: &Book, highlight: &Highlight, author: &str, opts: &ComposeOptions) -> String {
    let title = encode_text(&strip_tags(&book.title)).to_string();
    let cite = match link_for(book, author, opts) {
        Some(url) => format!(
            "<a href=\"{}\"><em><b>{}</b></em></a>",
            encode_double_quoted_attribute(&url),
            title
        ),
        None => format!("<em><b>{}</b></em>", title),
    };

    let mut attribution = cite;
    if let Some(page) = page_qualifier(book, highlight) {
        attribution.push(' ');
        attribution.push_str(&encode_text(&page));
    }
    let author = author.trim();
    if !author.is_empty() {
        attribution.push_str(" \u{2014}");
        attribution.push_str(&encode_text(author));
    }

    format!(
        "<p>\"{}\"</p>\n<p>{}</p>",
        encode_text(highlight.text.trim()),
        attribution
    )
}

/// Builds the entry for a highlight that passed routing. `author` is already remapped.
pub fn compose(
    book: &Book,
    highlight: &Highlight,
    author: &str,
    routed: Routed,
    opts: &ComposeOptions,
) -> NewEntry {
    NewEntry {
        title: strip_tags(&book.title),
        content: render_body(book, highlight, author, opts),
        status: routed.status,
        author_id: opts.author_id,
        byline: author.trim().to_string(),
        tags: routed.tags,
        format: POST_FORMAT.to_string(),
        thumbnail_url: book.cover_image_url.clone(),
        meta: vec![],
    }
}

/// Stable key for a highlight, used to recognise entries created by earlier runs.
pub fn source_key(book: &Book, highlight: &Highlight) -> String {
    let mut hasher = Sha256::new();
    hasher.update(book.user_book_id.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(highlight.text.as_bytes());
    hasher.update(b"\n");
    hasher.update(highlight.location.as_deref().unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}
