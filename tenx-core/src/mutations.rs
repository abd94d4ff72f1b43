use reqwest::StatusCode;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::cache::{ListScope, ResourceCache, ResourcePatch};
use crate::error::{ClientError, ClientResult};
use crate::models::{BookmarkResponse, NewResource, ResourceSummary, UpvoteResponse, VoteAction};
use crate::validation::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A transient message for the user, e.g. a toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Mutations {
    api: ApiClient,
    cache: ResourceCache,
    notices: broadcast::Sender<Notice>,
}

impl Mutations {
    pub fn new(api: ApiClient, cache: ResourceCache) -> Self {
        let (notices, _) = broadcast::channel(32);
        Self {
            api,
            cache,
            notices,
        }
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    fn notify(&self, level: NoticeLevel, message: String) {
        let _ = self.notices.send(Notice { level, message });
    }

    fn notify_failure(&self, err: &ClientError, fallback: &str) {
        let message = match err.status() {
            Some(StatusCode::FORBIDDEN) | Some(StatusCode::UNAUTHORIZED) => err.user_message(),
            _ => match err {
                ClientError::Validation(_) => err.user_message(),
                _ => fallback.to_owned(),
            },
        };
        self.notify(NoticeLevel::Error, message);
    }

    /// Toggles the caller's upvote. Nothing is changed locally until the
    /// server answers; its count then overwrites every cached copy.
    pub async fn toggle_upvote(&self, resource_id: &str) -> ClientResult<UpvoteResponse> {
        match self.api.toggle_upvote(resource_id).await {
            Ok(response) => {
                let patch = ResourcePatch::Upvotes {
                    count: response.count,
                    has_upvoted: Some(response.action == VoteAction::Added),
                };
                let touched = self.cache.patch(&response.resource_id, &patch).await;
                info!(resource_id = %response.resource_id, count = response.count, touched, "upvote applied");
                Ok(response)
            }
            Err(err) => {
                warn!(resource_id, error = %err, "upvote failed");
                self.notify_failure(&err, "Failed to upvote resource. Please try again.");
                Err(err)
            }
        }
    }

    /// Toggles the bookmark optimistically and rolls back to the captured
    /// state if the request fails.
    pub async fn toggle_bookmark(&self, resource_id: &str) -> ClientResult<BookmarkResponse> {
        self.cache.cancel_resource_queries(resource_id).await;
        let capture = self.cache.capture(resource_id).await;
        self.cache
            .patch(resource_id, &ResourcePatch::ToggleBookmark)
            .await;

        match self.api.toggle_bookmark(resource_id).await {
            Ok(response) => {
                if let Some(action) = response.action {
                    let patch = ResourcePatch::Bookmark {
                        is_bookmarked: action == VoteAction::Added,
                        count: response.count,
                    };
                    self.cache.patch(resource_id, &patch).await;
                }
                Ok(response)
            }
            Err(err) => {
                let restored = self.cache.restore(&capture).await;
                warn!(resource_id, error = %err, restored, "bookmark failed, rolled back");
                self.notify_failure(&err, "Failed to update bookmark. Please try again.");
                Err(err)
            }
        }
    }

    pub async fn submit_resource(&self, resource: &NewResource) -> ClientResult<ResourceSummary> {
        if let Err(err) = resource.check() {
            self.notify_failure(&err, "Please check the form");
            return Err(err);
        }
        match self.api.create_resource(resource).await {
            Ok(created) => {
                self.cache.invalidate_scope(ListScope::Submissions).await;
                self.notify(
                    NoticeLevel::Success,
                    "Resource submitted successfully!".to_owned(),
                );
                Ok(created)
            }
            Err(err) => {
                self.notify_failure(&err, "Failed to submit resource. Please try again.");
                Err(err)
            }
        }
    }

    pub async fn update_resource(
        &self,
        resource_id: &str,
        resource: &NewResource,
    ) -> ClientResult<ResourceSummary> {
        if let Err(err) = resource.check() {
            self.notify_failure(&err, "Please check the form");
            return Err(err);
        }
        match self.api.update_resource(resource_id, resource).await {
            Ok(updated) => {
                self.cache.put_resource(updated.clone()).await;
                self.cache.invalidate_scope(ListScope::Submissions).await;
                self.notify(
                    NoticeLevel::Success,
                    "Resource updated successfully!".to_owned(),
                );
                Ok(updated)
            }
            Err(err) => {
                self.notify_failure(&err, "Failed to update resource. Please try again.");
                Err(err)
            }
        }
    }
}
