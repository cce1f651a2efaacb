//! ResultPublisher - 完了した envelope の書き出し
//!
//! # フロー
//! 1. response queue があれば broadcast（購読中の全 instance の配送キーへ push + expire）
//! 2. db key prefix があれば `<prefix><id>` に TTL 付きで set（上書き）
//! 3. どちらも無ければ何もしない

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::hooks::HookRegistry;
use crate::domain::keys::{db_key, delivery_key};
use crate::ports::{Broker, BrokerError};

#[derive(Clone)]
pub struct ResultPublisher {
    broker: Arc<dyn Broker>,
    hooks: HookRegistry,
    ttl: Duration,
}

impl ResultPublisher {
    pub fn new(broker: Arc<dyn Broker>, hooks: HookRegistry, ttl: Duration) -> Self {
        Self { broker, hooks, ttl }
    }

    /// Fan `bytes` out to every instance subscribed to `queue`.
    ///
    /// Returns the number of deliveries.
    pub async fn broadcast(&self, queue: &str, bytes: &[u8]) -> Result<usize, BrokerError> {
        let subscribers = self.hooks.subscribers(queue).await?;
        for instance in &subscribers {
            let key = delivery_key(queue, instance);
            self.broker.push(&key, bytes).await?;
            self.broker.expire(&key, self.ttl).await?;
        }
        debug!(queue = %queue, deliveries = subscribers.len(), "Broadcast");
        Ok(subscribers.len())
    }

    /// Write `bytes` to `key` with the configured TTL.
    pub async fn store(&self, key: &str, bytes: &[u8]) -> Result<(), BrokerError> {
        self.broker.set_with_ttl(key, bytes, self.ttl).await
    }

    pub async fn publish(
        &self,
        response_queue: Option<&str>,
        db_key_prefix: Option<&str>,
        id: &str,
        bytes: &[u8],
    ) -> Result<(), BrokerError> {
        if let Some(queue) = response_queue {
            self.broadcast(queue, bytes).await?;
        }
        if let Some(prefix) = db_key_prefix {
            self.store(&db_key(prefix, id), bytes).await?;
        }
        Ok(())
    }
}
