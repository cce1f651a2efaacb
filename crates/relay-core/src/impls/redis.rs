//! Redis Broker implementation.
//!
//! Two connection managers are kept: one for ordinary commands and one that is
//! parked in `BLPOP` by the dispatch loop, so a waiting pop never stalls
//! publishes issued by workers on the same process.

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use tracing::{debug, info};

use crate::ports::{Broker, BrokerError};

pub struct RedisBroker {
    conn: ConnectionManager,
    blocking: ConnectionManager,
}

impl RedisBroker {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        let blocking = ConnectionManager::new(client).await?;

        info!(url = %url, "Connected to Redis broker");

        Ok(Self { conn, blocking })
    }
}

/// Redis expiries are whole seconds; round up and never hand out 0.
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push(&self, key: &str, value: &[u8]) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn blocking_pop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, Vec<u8>)>, BrokerError> {
        let mut conn = self.blocking.clone();
        // BLPOP treats 0 as "forever"; keep the bounded contract of the port.
        let secs = timeout.as_secs_f64().max(0.001);
        let popped: Option<(String, Vec<u8>)> = conn.blpop(keys, secs).await?;

        if let Some((key, _)) = &popped {
            debug!(key = %key, "Popped from Redis");
        }

        Ok(popped)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BrokerError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(key, ttl_secs(ttl) as i64).await?;
        Ok(())
    }

    async fn list_members(&self, key: &str) -> Result<Vec<String>, BrokerError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.lrange(key, 0, -1).await?;
        Ok(members)
    }

    async fn remove_from_list(&self, key: &str, value: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: () = conn.lrem(key, 0, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, BrokerError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys)
    }
}
