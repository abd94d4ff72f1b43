use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::ResourceKind;

/// The constraints that scope a resource listing. Also the cache partition key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterSet {
    pub category: Option<String>,
    pub resource_type: Option<ResourceKind>,
    /// Selection order is preserved; duplicates are never stored.
    pub tags: Vec<String>,
    pub query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterChange {
    Category(Option<String>),
    ResourceType(Option<ResourceKind>),
    ToggleTag(String),
    ClearTags,
    Query(Option<String>),
    Replace(FilterSet),
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

impl FilterSet {
    /// Parses the filters carried by a page URL query string.
    ///
    /// Accepts both `tags` and the older `tag` key, and `query` or `q`.
    pub fn from_query(query: &str) -> Self {
        let mut filters = FilterSet::default();
        for (key, value) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            match key.as_ref() {
                "category" => filters.category = non_empty(Some(value.into_owned())),
                "resourceType" => filters.resource_type = ResourceKind::parse(value.trim()),
                "tags" | "tag" => {
                    for tag in value.split(',') {
                        filters.add_tag(tag);
                    }
                }
                "query" | "q" => filters.query = non_empty(Some(value.into_owned())),
                _ => {}
            }
        }
        filters
    }

    pub fn from_url(url: &Url) -> Self {
        Self::from_query(url.query().unwrap_or_default())
    }

    pub fn is_empty(&self) -> bool {
        *self == FilterSet::default()
    }

    fn add_tag(&mut self, tag: &str) {
        let tag = tag.trim();
        if !tag.is_empty() && !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_owned());
        }
    }

    pub fn toggle_tag(&mut self, tag: &str) {
        let tag = tag.trim();
        if let Some(pos) = self.tags.iter().position(|t| t == tag) {
            self.tags.remove(pos);
        } else {
            self.add_tag(tag);
        }
    }

    pub fn apply(&mut self, change: FilterChange) {
        match change {
            FilterChange::Category(category) => self.category = non_empty(category),
            FilterChange::ResourceType(kind) => self.resource_type = kind,
            FilterChange::ToggleTag(tag) => self.toggle_tag(&tag),
            FilterChange::ClearTags => self.tags.clear(),
            FilterChange::Query(query) => self.query = non_empty(query),
            FilterChange::Replace(filters) => *self = filters,
        }
    }

    /// Query pairs with empty constraints omitted entirely.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(category) = &self.category {
            pairs.push(("category", category.clone()));
        }
        if let Some(kind) = self.resource_type {
            pairs.push(("resourceType", kind.as_str().to_owned()));
        }
        if !self.tags.is_empty() {
            pairs.push(("tags", self.tags.join(",")));
        }
        if let Some(query) = &self.query {
            pairs.push(("query", query.clone()));
        }
        pairs
    }

    /// The shareable page URL for these filters.
    pub fn to_url(&self, page: &Url) -> Url {
        let mut url = page.clone();
        url.set_query(None);
        let pairs = self.to_query_pairs();
        if !pairs.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in pairs {
                query.append_pair(key, &value);
            }
        }
        url
    }
}
