use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::{ResourceCache, ResourcePatch};
use crate::config::{ClientConfig, ReconnectPolicy};
use crate::counts::UpvoteStore;
use crate::error::{ClientError, ClientResult};
use crate::frame::{SseDecoder, SseMessage, StreamFrame};

pub type ByteStream = Pin<Box<dyn Stream<Item = ClientResult<Bytes>> + Send>>;

/// Opens the server-push transport. Dropping the returned stream closes it.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn connect(&self) -> ClientResult<ByteStream>;
}

#[derive(Debug, Clone)]
pub struct HttpStreamSource {
    client: Client,
    url: Url,
}

impl HttpStreamSource {
    pub fn new(client: Client, url: Url) -> Self {
        Self { client, url }
    }

    pub fn from_config(client: Client, config: &ClientConfig) -> ClientResult<Self> {
        Ok(Self::new(client, config.stream_url()?))
    }
}

#[async_trait]
impl StreamSource for HttpStreamSource {
    async fn connect(&self) -> ClientResult<ByteStream> {
        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status,
                message: format!("stream endpoint {} refused connection", self.url),
            });
        }
        Ok(Box::pin(
            response.bytes_stream().map(|chunk| chunk.map_err(ClientError::from)),
        ))
    }
}

pub struct StreamHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl StreamHandle {
    /// Closes the connection, cancels any pending reconnect and waits for the task.
    pub async fn stop(self) -> ClientResult<()> {
        let _ = self.cancel_tx.send(());
        self.join.await.map_err(ClientError::from)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

enum Outcome {
    Stopped,
    Failed(ClientError),
}

/// Keeps one live connection to the upvote stream until stopped.
///
/// Counts land in `store`; when `cache` is given, every cached occurrence of
/// the resource gets its `upvote_count` overwritten too. After a transport
/// failure the old stream is dropped and a new one is opened once
/// `policy` allows. Dropping the handle without calling `stop` also ends
/// the task.
pub fn spawn_stream<S>(
    source: S,
    store: UpvoteStore,
    cache: Option<ResourceCache>,
    policy: ReconnectPolicy,
) -> StreamHandle
where
    S: StreamSource + 'static,
{
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        let mut attempt: u32 = 0;

        loop {
            let connected = tokio::select! {
                _ = cancel_rx.recv() => break,
                result = source.connect() => result,
            };

            match connected {
                Ok(mut frames) => {
                    info!("upvote stream connected");
                    store.set_connected();
                    attempt = 0;

                    let mut decoder = SseDecoder::new();
                    let outcome = loop {
                        tokio::select! {
                            _ = cancel_rx.recv() => break Outcome::Stopped,
                            chunk = frames.next() => match chunk {
                                Some(Ok(bytes)) => {
                                    for message in decoder.push(&bytes) {
                                        handle_message(message, &store, cache.as_ref()).await;
                                    }
                                }
                                Some(Err(err)) => break Outcome::Failed(err),
                                None => break Outcome::Failed(ClientError::StreamClosed),
                            }
                        }
                    };

                    drop(frames);
                    store.set_disconnected();
                    match outcome {
                        Outcome::Stopped => break,
                        Outcome::Failed(err) => warn!(error = %err, "upvote stream lost"),
                    }
                }
                Err(err) => {
                    store.set_disconnected();
                    warn!(error = %err, "failed to open upvote stream");
                }
            }

            let delay = policy.delay(attempt);
            attempt = attempt.saturating_add(1);
            info!(?delay, attempt, "scheduling upvote stream reconnect");
            tokio::select! {
                _ = cancel_rx.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        store.set_disconnected();
        info!("upvote stream closed");
    });

    StreamHandle { cancel_tx, join }
}

async fn handle_message(message: SseMessage, store: &UpvoteStore, cache: Option<&ResourceCache>) {
    let data = match message {
        SseMessage::Comment(_) => {
            trace!("keep-alive");
            return;
        }
        SseMessage::Event { data, .. } => data,
    };

    match StreamFrame::classify(&data) {
        Ok(StreamFrame::KeepAlive) => trace!("keep-alive"),
        Ok(StreamFrame::Connected { connection_id }) => {
            store.set_connection_id(&connection_id);
            debug!(%connection_id, "upvote stream session established");
        }
        Ok(StreamFrame::Upvote(event)) => {
            store.record(&event);
            if let Some(cache) = cache {
                let patch = ResourcePatch::Upvotes {
                    count: event.count,
                    has_upvoted: None,
                };
                cache.patch(&event.resource_id, &patch).await;
            }
        }
        Err(err) => warn!(error = %err, "failed to parse stream frame"),
    }
}
