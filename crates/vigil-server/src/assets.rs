//! Asset fetching by URI.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use vigil_core::ClientId;
use vigil_protocol::ServerBinaryMessage;

use crate::client::Client;
use crate::metrics::VIGIL_ASSET_FETCHES_TOTAL;

/// Resolves asset URIs (meshes, URDF files, images) for clients.
#[async_trait]
pub trait AssetHandler: Send + Sync + 'static {
    /// Fetch the asset at `uri`, returning its bytes or an error message.
    async fn fetch(&self, client: ClientId, uri: String) -> Result<Bytes, String>;
}

struct AssetFn<F>(F);

#[async_trait]
impl<F, Fut> AssetHandler for AssetFn<F>
where
    F: Fn(ClientId, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, String>> + Send + 'static,
{
    async fn fetch(&self, client: ClientId, uri: String) -> Result<Bytes, String> {
        (self.0)(client, uri).await
    }
}

/// Wrap an async function as an [`AssetHandler`].
pub fn asset_handler_fn<F, Fut>(f: F) -> Arc<dyn AssetHandler>
where
    F: Fn(ClientId, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, String>> + Send + 'static,
{
    Arc::new(AssetFn(f))
}

/// Runs asset fetches with a global concurrency limit.
pub struct AssetResolver {
    handler: Arc<dyn AssetHandler>,
    permits: Arc<Semaphore>,
}

impl AssetResolver {
    /// Allow at most `max_concurrent` fetches at once (minimum 1).
    pub fn new(handler: Arc<dyn AssetHandler>, max_concurrent: usize) -> Self {
        Self {
            handler,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Start a fetch. The response, success or failure, is queued on the
    /// client's control queue under `request_id`.
    pub fn fetch(&self, client: &Arc<Client>, uri: String, request_id: u32) {
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            warn!(client_id = %client.id(), %uri, "too many concurrent asset fetches");
            counter!(VIGIL_ASSET_FETCHES_TOTAL, "outcome" => "rejected").increment(1);
            let _ = client.send_binary(&ServerBinaryMessage::FetchAssetResponse {
                request_id,
                result: Err("too many concurrent asset requests".into()),
            });
            return;
        };

        let handler = self.handler.clone();
        let client = client.clone();
        let _ = tokio::spawn(async move {
            let _permit = permit;
            let client_id = client.id();
            let fetch_uri = uri.clone();
            let outcome = tokio::spawn(async move { handler.fetch(client_id, fetch_uri).await }).await;
            let result = match outcome {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err("asset handler panicked".into()),
                Err(_) => Err("asset handler was cancelled".into()),
            };
            let label = if result.is_ok() { "ok" } else { "error" };
            counter!(VIGIL_ASSET_FETCHES_TOTAL, "outcome" => label).increment(1);
            if client.is_disconnecting() {
                return;
            }
            debug!(client_id = %client_id, %uri, ok = result.is_ok(), "asset fetch finished");
            let _ = client.send_binary(&ServerBinaryMessage::FetchAssetResponse { request_id, result });
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;

    fn client() -> Arc<Client> {
        Arc::new(Client::new(
            ClientId::new(1),
            "127.0.0.1:1".parse().unwrap(),
            8,
            8,
            CancellationToken::new(),
        ))
    }

    async fn next_response(client: &Client) -> ServerBinaryMessage {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.control_queue().pop())
            .await
            .unwrap()
            .unwrap();
        ServerBinaryMessage::decode(frame.into_binary().unwrap()).unwrap()
    }

    fn resolver(max: usize) -> AssetResolver {
        AssetResolver::new(
            asset_handler_fn(|_, uri: String| async move {
                if uri.starts_with("slow://") {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                }
                if uri.ends_with("missing") {
                    Err(format!("not found: {uri}"))
                } else {
                    Ok(Bytes::from(uri))
                }
            }),
            max,
        )
    }

    #[tokio::test]
    async fn fetch_success() {
        let c = client();
        resolver(4).fetch(&c, "package://robot.urdf".into(), 3);
        assert_eq!(
            next_response(&c).await,
            ServerBinaryMessage::FetchAssetResponse {
                request_id: 3,
                result: Ok(Bytes::from_static(b"package://robot.urdf")),
            }
        );
    }

    #[tokio::test]
    async fn fetch_error_is_reported() {
        let c = client();
        resolver(4).fetch(&c, "file://missing".into(), 4);
        match next_response(&c).await {
            ServerBinaryMessage::FetchAssetResponse { request_id: 4, result: Err(msg) } => {
                assert!(msg.contains("not found"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn over_limit_is_rejected() {
        let c = client();
        let r = resolver(1);
        r.fetch(&c, "slow://a".into(), 1);
        r.fetch(&c, "slow://b".into(), 2);
        match next_response(&c).await {
            ServerBinaryMessage::FetchAssetResponse { request_id: 2, result: Err(msg) } => {
                assert!(msg.contains("too many"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            next_response(&c).await,
            ServerBinaryMessage::FetchAssetResponse { request_id: 1, result: Ok(_) }
        ));
    }
}
