//! Tag routing: decides whether a highlight becomes a post, with which status and tags.
//!
//! Any tag containing `wppost` opts a highlight in. Precedence between control tags is
//! fixed rather than positional: `wppost:publish` beats `wppost:draft`, which beats any
//! other `wppost` variant. Everything except `wppost:publish` ends up as a draft.

use std::collections::HashSet;

use crate::model::PostStatus;

pub const CONTROL_PREFIX: &str = "wppost";
pub const PUBLISH_TAG: &str = "wppost:publish";
pub const DRAFT_TAG: &str = "wppost:draft";

/// Strongest control signal seen on a highlight, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Control {
    Absent,
    Bare,
    Draft,
    Publish,
}

impl Control {
    pub fn of(tag: &str) -> Self {
        match tag {
            PUBLISH_TAG => Control::Publish,
            DRAFT_TAG => Control::Draft,
            t if t.contains(CONTROL_PREFIX) => Control::Bare,
            _ => Control::Absent,
        }
    }

    fn status(self) -> Option<PostStatus> {
        match self {
            Control::Absent => None,
            Control::Publish => Some(PostStatus::Publish),
            Control::Bare | Control::Draft => Some(PostStatus::Draft),
        }
    }
}

/// Additive and subtractive tag lists from the settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagRules {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl TagRules {
    pub fn from_settings(added: &str, removed: &str) -> Self {
        Self {
            added: split_tag_list(added),
            removed: split_tag_list(removed),
        }
    }
}

pub fn split_tag_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub status: PostStatus,
    pub tags: Vec<String>,
}

/// Routes one highlight by its tag names. `None` means the highlight is not published.
pub fn route<'a, I>(tags: I, rules: &TagRules) -> Option<Routed>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut control = Control::Absent;
    let mut entry_tags: Vec<String> = rules.added.clone();

    for tag in tags {
        match Control::of(tag) {
            Control::Absent => entry_tags.push(tag.to_string()),
            signal => control = control.max(signal),
        }
    }

    let status = control.status()?;

    let removed: HashSet<&str> = rules.removed.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    entry_tags.retain(|t| !removed.contains(t.as_str()) && seen.insert(t.clone()));

    Some(Routed {
        status,
        tags: entry_tags,
    })
}
