use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Video,
    Article,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Video => "video",
            ResourceKind::Article => "article",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "video" => Some(ResourceKind::Video),
            "article" => Some(ResourceKind::Article),
            _ => None,
        }
    }
}

/// A resource as rendered by feed, search and bookmark views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub image: Option<String>,
    pub resource_type: ResourceKind,
    #[serde(default)]
    pub category_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "published_by_default")]
    pub is_published: bool,
    #[serde(default)]
    pub upvote_count: u64,
    #[serde(default)]
    pub has_upvoted: bool,
    #[serde(default)]
    pub is_bookmarked: bool,
    #[serde(default, alias = "bookmarks")]
    pub bookmark_count: u64,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn published_by_default() -> bool {
    true
}

impl ResourceSummary {
    /// Embeddable player URL for YouTube links, `None` for anything else.
    pub fn embed_url(&self) -> Option<String> {
        youtube_embed_url(&self.url)
    }
}

pub fn youtube_embed_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    let host = parsed.host_str()?;

    let video_id = if host == "youtu.be" {
        Some(parsed.path().trim_start_matches('/').to_owned())
    } else if host.contains("youtube.com") {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
    } else {
        None
    };

    video_id
        .filter(|id| !id.is_empty())
        .map(|id| format!("https://www.youtube.com/embed/{id}"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePage {
    #[serde(default)]
    pub resources: Vec<ResourceSummary>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookmarkEntry {
    pub id: String,
    pub resource: ResourceSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkPage {
    #[serde(default)]
    pub bookmarks: Vec<BookmarkEntry>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl From<BookmarkPage> for ResourcePage {
    fn from(page: BookmarkPage) -> Self {
        let resources = page
            .bookmarks
            .into_iter()
            .map(|entry| {
                let mut resource = entry.resource;
                resource.is_bookmarked = true;
                resource
            })
            .collect();
        ResourcePage {
            resources,
            next_cursor: page.next_cursor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VoteAction {
    Added,
    Removed,
}

/// Authoritative result of toggling an upvote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpvoteResponse {
    pub resource_id: String,
    pub action: VoteAction,
    pub count: u64,
}

/// Bookmark toggle responses vary; every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkResponse {
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub action: Option<VoteAction>,
    #[serde(default)]
    pub count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Bytes,
}

/// Payload of the submission form, used for both create and update.
#[derive(Debug, Clone, PartialEq)]
pub struct NewResource {
    pub title: String,
    pub description: String,
    pub url: String,
    pub resource_type: ResourceKind,
    pub category_name: String,
    /// Comma-joined, as entered in the form.
    pub tags: String,
    pub image_url: Option<String>,
    pub image: Option<ImageUpload>,
}

impl NewResource {
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn youtube_links_become_embeds() {
        assert_eq!(
            youtube_embed_url("https://www.youtube.com/watch?v=hZeprLzd6xM").as_deref(),
            Some("https://www.youtube.com/embed/hZeprLzd6xM")
        );
        assert_eq!(
            youtube_embed_url("https://youtu.be/abc123").as_deref(),
            Some("https://www.youtube.com/embed/abc123")
        );
        assert_eq!(youtube_embed_url("https://example.com/watch?v=x"), None);
        assert_eq!(youtube_embed_url("not a url"), None);
    }

    #[test]
    fn summary_accepts_legacy_bookmark_field() {
        let json = r#"{"id":"r1","title":"Rust","resourceType":"article","bookmarks":7,"upvoteCount":2}"#;
        let summary: ResourceSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.bookmark_count, 7);
        assert_eq!(summary.upvote_count, 2);
        assert!(summary.is_published);
        assert!(!summary.has_upvoted);
    }

    #[test]
    fn bookmark_page_flattens_to_resources() {
        let json = r#"{"bookmarks":[{"id":"b1","resource":{"id":"r1","title":"T","resourceType":"video"}}],"nextCursor":null}"#;
        let page: BookmarkPage = serde_json::from_str(json).unwrap();
        let page = ResourcePage::from(page);
        assert_eq!(page.resources.len(), 1);
        assert!(page.resources[0].is_bookmarked);
        assert!(page.next_cursor.is_none());
    }
}
