use serde::{Deserialize, Deserializer, Serialize};

/// One page of `GET /api/v2/export/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportPage {
    #[serde(default)]
    pub count: i64,
    #[serde(
        rename = "nextPageCursor",
        default,
        deserialize_with = "string_or_number"
    )]
    pub next_page_cursor: Option<String>,
    pub results: Vec<Book>,
}

impl ExportPage {
    /// The cursor to request next, if the export has more pages.
    pub fn next_cursor(&self) -> Option<&str> {
        self.next_page_cursor
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "books", alias = "book")]
    Book,
    #[serde(rename = "articles", alias = "article")]
    Article,
    #[serde(rename = "podcasts", alias = "podcast")]
    Podcast,
    #[serde(rename = "tweets", alias = "tweet")]
    Tweet,
    #[default]
    #[serde(rename = "other", other)]
    Other,
}

/// A source collection: the book, article or podcast a set of highlights came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub user_book_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub readable_title: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub unique_url: Option<String>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub document_note: Option<String>,
    #[serde(default)]
    pub readwise_url: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub asin: Option<String>,
    #[serde(default)]
    pub book_tags: Vec<Tag>,
    #[serde(default)]
    pub highlights: Vec<Highlight>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Highlight {
    pub id: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub location: Option<String>,
    #[serde(default)]
    pub location_type: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub highlighted_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub book_id: Option<i64>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Highlight {
    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|t| t.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
}

// Readwise sends locations and cursors as numbers; older exports used strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Str(s)) if !s.trim().is_empty() => Some(s),
        Some(Raw::Int(n)) => Some(n.to_string()),
        Some(Raw::Float(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_export_page_with_numeric_cursor_and_location() {
        let body = r#"{
            "count": 1,
            "nextPageCursor": 4242,
            "results": [{
                "user_book_id": 7,
                "title": "On Writing",
                "author": "S. King",
                "category": "books",
                "source_url": null,
                "cover_image_url": "https://img/cover.jpg",
                "highlights": [{
                    "id": 1,
                    "text": "Ideas matter",
                    "location": 12,
                    "location_type": "page",
                    "tags": [{"id": 3, "name": "wppost:publish"}]
                }]
            }]
        }"#;

        let page: ExportPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.next_cursor(), Some("4242"));
        let book = &page.results[0];
        assert_eq!(book.category, Category::Book);
        assert_eq!(book.highlights[0].location.as_deref(), Some("12"));
        assert_eq!(book.highlights[0].tag_names().collect::<Vec<_>>(), vec!["wppost:publish"]);
    }

    #[test]
    fn null_or_empty_cursor_ends_pagination() {
        let page: ExportPage =
            serde_json::from_str(r#"{"count":0,"nextPageCursor":null,"results":[]}"#).unwrap();
        assert_eq!(page.next_cursor(), None);

        let page: ExportPage =
            serde_json::from_str(r#"{"count":0,"nextPageCursor":"","results":[]}"#).unwrap();
        assert_eq!(page.next_cursor(), None);

        let page: ExportPage = serde_json::from_str(r#"{"results":[]}"#).unwrap();
        assert_eq!(page.next_cursor(), None);
    }

    #[test]
    fn unknown_category_maps_to_other() {
        let book: Book = serde_json::from_str(
            r#"{"user_book_id": 1, "title": "t", "category": "supplementals"}"#,
        )
        .unwrap();
        assert_eq!(book.category, Category::Other);

        let book: Book =
            serde_json::from_str(r#"{"user_book_id": 1, "title": "t", "category": "article"}"#)
                .unwrap();
        assert_eq!(book.category, Category::Article);
    }
}
