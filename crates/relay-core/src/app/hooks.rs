//! HookRegistry - どの instance がどのキューを購読しているか
//!
//! broker 上の `hooks:<queue>` list に instance id を積む。
//! producer は broadcast 時にこの list を引いて、各 instance の配送キーへ push する。

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::keys::{HOOKS_PATTERN, hooks_key};
use crate::ports::{Broker, BrokerError};

#[derive(Clone)]
pub struct HookRegistry {
    broker: Arc<dyn Broker>,
    instance_id: String,
}

/// 重複を除き、最初に現れた順を保つ
fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

impl HookRegistry {
    pub fn new(broker: Arc<dyn Broker>, instance_id: impl Into<String>) -> Self {
        Self {
            broker,
            instance_id: instance_id.into(),
        }
    }

    /// Startup sweep over every `hooks:*` list.
    ///
    /// 前回クラッシュした同じ instance id の登録を消す。自分が登録するキューに限らず全件が対象。
    /// 各 list は重複除去 + 自分の id を除いた順で書き直される。
    pub async fn sweep_stale(&self) -> Result<usize, BrokerError> {
        let keys = self.broker.keys(HOOKS_PATTERN).await?;
        let mut removed = 0;

        for key in keys {
            let mut ids = dedup_preserving_order(self.broker.list_members(&key).await?);
            if let Some(pos) = ids.iter().position(|id| id == &self.instance_id) {
                ids.remove(pos);
                removed += 1;
            }

            self.broker.delete(&key).await?;
            for id in &ids {
                self.broker.push(&key, id.as_bytes()).await?;
            }
            debug!(key = %key, subscribers = ids.len(), "Rewrote hook list");
        }

        info!(
            instance = %self.instance_id,
            stale = removed,
            "Swept stale hook registrations"
        );
        Ok(removed)
    }

    /// Subscribe this instance to `queue`.
    ///
    /// 先に同じ id を LREM してから RPUSH するので、何度呼んでも 1 件だけ残る。
    pub async fn subscribe(&self, queue: &str) -> Result<(), BrokerError> {
        let key = hooks_key(queue);
        self.broker.remove_from_list(&key, &self.instance_id).await?;
        self.broker.push(&key, self.instance_id.as_bytes()).await?;
        info!(queue = %queue, instance = %self.instance_id, "Subscribed");
        Ok(())
    }

    pub async fn subscribers(&self, queue: &str) -> Result<Vec<String>, BrokerError> {
        self.broker.list_members(&hooks_key(queue)).await
    }
}
