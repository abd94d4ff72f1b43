pub mod api;
pub mod cache;
pub mod config;
pub mod counts;
pub mod debounce;
pub mod error;
pub mod feed;
pub mod filters;
pub mod frame;
pub mod models;
pub mod mutations;
pub mod stream;
pub mod validation;

pub use api::{build_http_client, ApiClient};
pub use cache::{
    patch_snapshot, visit_snapshot, CacheEvent, CacheSnapshot, ListKey, ListScope, ResourceCache,
    ResourcePatch,
};
pub use config::{ClientConfig, ReconnectPolicy};
pub use counts::{ConnectionStatus, CountsView, StreamConnectionState, UpvoteStore};
pub use debounce::Debouncer;
pub use error::{ClientError, ClientResult};
pub use feed::{Queries, ResourceFeed};
pub use filters::{FilterChange, FilterSet};
pub use frame::{SseDecoder, StreamFrame, UpvoteEvent};
pub use models::{ResourceKind, ResourcePage, ResourceSummary, UpvoteResponse, VoteAction};
pub use mutations::{Mutations, Notice, NoticeLevel};
pub use stream::{spawn_stream, HttpStreamSource, StreamHandle, StreamSource};
pub use validation::{FieldError, Validate};
