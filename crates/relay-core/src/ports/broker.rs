//! Broker port - list / key-value broker の抽象化
//!
//! 実体は Redis を想定しているが、ここでは使う操作だけを定義する。
//!
//! # 実装
//! - **InMemoryBroker**: 開発・テスト用
//! - **RedisBroker**: 本番用（feature `redis`）

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[cfg(feature = "redis")]
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("wrong value type at key={key}")]
    WrongType { key: String },

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Broker は atomic な list 操作と TTL 付き key/value を提供する
///
/// # 設計原則
/// - list は右から push、左から pop（キー単位で FIFO）
/// - `blocking_pop` は複数キーを監視し、最初に取れた (key, value) を返す
/// - timeout したら `Ok(None)`
///
/// # Thread Safety
/// - `Send + Sync`（dispatch loop と worker から共有される）
#[async_trait]
pub trait Broker: Send + Sync {
    /// RPUSH
    async fn push(&self, key: &str, value: &[u8]) -> Result<(), BrokerError>;

    /// BLPOP over `keys`.
    async fn blocking_pop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, Vec<u8>)>, BrokerError>;

    /// SET with expiry; overwrites any previous value.
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration)
        -> Result<(), BrokerError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BrokerError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BrokerError>;

    /// LRANGE key 0 -1
    async fn list_members(&self, key: &str) -> Result<Vec<String>, BrokerError>;

    /// LREM key 0 value
    async fn remove_from_list(&self, key: &str, value: &str) -> Result<(), BrokerError>;

    async fn delete(&self, key: &str) -> Result<(), BrokerError>;

    /// KEYS pattern (`*` / `?` glob)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, BrokerError>;
}
