//! ServiceBuilder - instance の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時処理（config 検証 → stale hook の掃除）を build() に集約
//! - 構築後は `&self` だけで register / run できるように内部を Arc / RwLock で持つ

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info};

use super::hooks::HookRegistry;
use super::pool::WorkerPool;
use super::publisher::ResultPublisher;
use crate::config::{DecodeFailurePolicy, RelayConfig};
use crate::domain::{InstanceId, RelayError};
use crate::ports::Broker;
use crate::typed::{DynHandler, Handler, HandlerRegistry, TypedHandler};

struct PendingRegistration {
    queue: String,
    handler: Arc<dyn DynHandler>,
    response_queue: Option<String>,
    db_key_prefix: Option<String>,
}

/// ServiceBuilder は Service を構築
///
/// # 使用例
/// ```ignore
/// let service = ServiceBuilder::new(broker, config)
///     .instance_id("node-1")
///     .build()
///     .await?;
/// service.register("echo", Arc::new(handler_fn(echo)), Some("echo.out"), None).await?;
/// service.run_forever().await?;
/// ```
pub struct ServiceBuilder {
    broker: Arc<dyn Broker>,
    config: RelayConfig,
    instance_id: Option<InstanceId>,
    initial: Vec<PendingRegistration>,
}

impl ServiceBuilder {
    pub fn new(broker: Arc<dyn Broker>, config: RelayConfig) -> Self {
        Self {
            broker,
            config,
            instance_id: None,
            initial: Vec::new(),
        }
    }

    /// config の instance_id より優先される
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(InstanceId::new(id));
        self
    }

    /// 事前に用意した登録（initial mapping）
    ///
    /// ローカルの対応表に入るだけで、hook の購読はしない。
    /// 購読も必要なら build 後に `Service::register` を使う。
    pub fn with_mapping(
        mut self,
        queue: &str,
        handler: Arc<dyn DynHandler>,
        response_queue: Option<&str>,
        db_key_prefix: Option<&str>,
    ) -> Self {
        self.initial.push(PendingRegistration {
            queue: queue.to_string(),
            handler,
            response_queue: response_queue.map(str::to_string),
            db_key_prefix: db_key_prefix.map(str::to_string),
        });
        self
    }

    /// Validate config, sweep stale hooks and assemble the service.
    pub async fn build(self) -> Result<Service, RelayError> {
        self.config.validate()?;
        let instance_id = self
            .instance_id
            .unwrap_or_else(|| self.config.instance_id());

        let hooks = HookRegistry::new(Arc::clone(&self.broker), instance_id.as_str());
        hooks.sweep_stale().await?;

        let mut registry = HandlerRegistry::new(instance_id.as_str());
        for pending in self.initial {
            registry.insert(
                &pending.queue,
                pending.handler,
                pending.response_queue.as_deref(),
                pending.db_key_prefix.as_deref(),
            );
        }

        let publisher = ResultPublisher::new(
            Arc::clone(&self.broker),
            hooks.clone(),
            self.config.response_ttl(),
        );
        let (shutdown, _) = watch::channel(false);

        info!(
            instance = %instance_id,
            max_workers = self.config.max_concurrent_workers,
            ttl_secs = self.config.response_ttl_secs,
            "Service ready"
        );

        Ok(Service {
            instance_id,
            broker: self.broker,
            registry: RwLock::new(registry),
            hooks,
            publisher,
            pool: WorkerPool::new(self.config.max_concurrent_workers),
            poll_timeout: self.config.poll_timeout(),
            decode_policy: self.config.on_decode_error,
            shutdown: Arc::new(shutdown),
        })
    }
}

/// Requests a graceful stop of [`Service::run_forever`].
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// 新しいメッセージの取得をやめ、実行中の worker を待ってから loop を抜ける
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Service は 1 つの instance
///
/// - register: ローカル登録 + hook 購読
/// - run_forever: dispatch loop（dispatcher.rs）
/// - broadcast / store: 他 instance への publish
pub struct Service {
    pub(super) instance_id: InstanceId,
    pub(super) broker: Arc<dyn Broker>,
    pub(super) registry: RwLock<HandlerRegistry>,
    pub(super) hooks: HookRegistry,
    pub(super) publisher: ResultPublisher,
    pub(super) pool: WorkerPool,
    pub(super) poll_timeout: Duration,
    pub(super) decode_policy: DecodeFailurePolicy,
    pub(super) shutdown: Arc<watch::Sender<bool>>,
}

impl Service {
    pub fn builder(broker: Arc<dyn Broker>, config: RelayConfig) -> ServiceBuilder {
        ServiceBuilder::new(broker, config)
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Map `queue` to `handler` on this instance.
    ///
    /// 同じキューへの再登録は上書き（last registration wins）。
    /// dispatch loop は毎回対応表を読み直すので、起動後の登録も反映される。
    pub async fn register(
        &self,
        queue: &str,
        handler: Arc<dyn DynHandler>,
        response_queue: Option<&str>,
        db_key_prefix: Option<&str>,
    ) -> Result<(), RelayError> {
        let replaced = self
            .registry
            .write()
            .await
            .insert(queue, handler, response_queue, db_key_prefix);
        if replaced.is_some() {
            debug!(queue = %queue, "Replaced existing registration");
        }
        self.hooks.subscribe(queue).await?;
        Ok(())
    }

    pub async fn register_typed<I, H>(
        &self,
        queue: &str,
        handler: H,
        response_queue: Option<&str>,
        db_key_prefix: Option<&str>,
    ) -> Result<(), RelayError>
    where
        I: DeserializeOwned + Send + 'static,
        H: Handler<I> + 'static,
    {
        let handler: Arc<dyn DynHandler> = Arc::new(TypedHandler::<I, H>::new(handler));
        self.register(queue, handler, response_queue, db_key_prefix)
            .await
    }

    /// Push `bytes` to every instance subscribed to `queue`.
    pub async fn broadcast(&self, queue: &str, bytes: &[u8]) -> Result<usize, RelayError> {
        Ok(self.publisher.broadcast(queue, bytes).await?)
    }

    /// Write `bytes` to `key` with the response TTL.
    pub async fn store(&self, key: &str, bytes: &[u8]) -> Result<(), RelayError> {
        Ok(self.publisher.store(key, bytes).await?)
    }

    pub async fn registered_keys(&self) -> Vec<String> {
        self.registry.read().await.keys()
    }

    pub fn active_workers(&self) -> usize {
        self.pool.active()
    }

    pub fn max_workers(&self) -> usize {
        self.pool.capacity()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }
}
