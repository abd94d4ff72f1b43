use std::collections::HashMap;

use tenx_core::{
    build_http_client, spawn_stream, ApiClient, ClientConfig, ClientResult, HttpStreamSource,
    Queries, ResourceCache, ResourceFeed, StreamConnectionState, UpvoteStore,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run().await {
        error!(error = %err, "watcher stopped");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Page to watch: the first argument, or the site root.
fn watched_page(config: &ClientConfig) -> ClientResult<Url> {
    let raw = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.site_url.clone());
    Ok(Url::parse(&raw)?)
}

async fn run() -> ClientResult<()> {
    let config = ClientConfig::load();
    config.validate()?;

    let client = build_http_client(&config)?;
    let api = ApiClient::new(client.clone(), &config)?;
    let cache = ResourceCache::new(config.cache.clone());
    let queries = Queries::new(api, cache.clone());

    let page = watched_page(&config)?;
    info!(%page, "watching feed");
    let feed = ResourceFeed::from_config(queries, page, &config);

    let store = UpvoteStore::new();
    let mut updates = store.subscribe();
    let source = HttpStreamSource::from_config(client, &config)?;
    let handle = spawn_stream(source, store.clone(), Some(cache), config.stream.reconnect);

    let mut seen: HashMap<String, u64> = HashMap::new();
    let mut connection = StreamConnectionState::default();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                if view.connection != connection {
                    info!(
                        connected = view.connection.is_connected(),
                        connection_id = view.connection.connection_id().unwrap_or("-"),
                        "stream state"
                    );
                    connection = view.connection.clone();
                }
                let listed = feed.resources().await;
                for (resource_id, count) in &view.counts {
                    if seen.get(resource_id) != Some(count) {
                        let title = listed
                            .iter()
                            .find(|r| &r.id == resource_id)
                            .map(|r| r.title.as_str())
                            .unwrap_or("-");
                        info!(%resource_id, count, title, "upvotes changed");
                        seen.insert(resource_id.clone(), *count);
                    }
                }
            }
        }
    }

    handle.stop().await?;
    if let Err(err) = feed.shutdown().await {
        warn!(error = %err, "feed did not shut down cleanly");
    }
    Ok(())
}
