use std::collections::BTreeMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Settings persisted in the store, read once at the start of every sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum SettingKey {
    AccessToken,
    TimeLastChecked,
    NewNameSets,
    UserAddedTags,
    UserRemovedTags,
}

impl SettingKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::AccessToken => "readwise_access_token",
            SettingKey::TimeLastChecked => "time_last_checked",
            SettingKey::NewNameSets => "new_name_sets",
            SettingKey::UserAddedTags => "user_added_tags",
            SettingKey::UserRemovedTags => "user_removed_tags",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    #[default]
    Draft,
    Publish,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Publish => "publish",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PostStatus::Draft),
            "publish" => Some(PostStatus::Publish),
            _ => None,
        }
    }
}

/// Fields of an entry about to be created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEntry {
    pub title: String,
    pub content: String,
    pub status: PostStatus,
    pub author_id: i64,
    pub byline: String,
    pub tags: Vec<String>,
    pub format: String,
    pub thumbnail_url: Option<String>,
    /// Stored with the entry in the same transaction.
    pub meta: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEntry {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub status: PostStatus,
    pub author_id: i64,
    pub byline: String,
    pub tags: Vec<String>,
    pub format: String,
    pub thumbnail_url: Option<String>,
    pub created_at: String,
    pub meta: BTreeMap<String, String>,
}
