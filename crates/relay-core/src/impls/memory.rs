//! InMemoryBroker - 開発・テスト用の broker
//!
//! # 学習ポイント
//! - tokio::sync::Mutex + Notify による blocking pop
//! - `Notified::enable()` で「チェック → 待機」の間の通知取りこぼしを防ぐ
//! - tokio::time::Instant を使うので、テストでは時計を止めて TTL を検証できる

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::ports::{Broker, BrokerError};

enum Slot {
    List(VecDeque<Vec<u8>>),
    Bytes(Vec<u8>),
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn list() -> Self {
        Self {
            slot: Slot::List(VecDeque::new()),
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// InMemoryBroker は 1 つのキー空間に list と文字列値を持つ
///
/// # 実装詳細
/// - HashMap<String, Entry> を Mutex で保護
/// - 期限切れのキーはアクセス時に削除（lazy eviction）
/// - push のたびに Notify で待機中の pop を起こす
/// - 空になった list はキーごと消える（Redis と同じ）
pub struct InMemoryBroker {
    entries: Mutex<HashMap<String, Entry>>,
    pushed: Notify,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            pushed: Notify::new(),
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn evict_expired(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn push(&self, key: &str, value: &[u8]) -> Result<(), BrokerError> {
        {
            let mut entries = self.entries.lock().await;
            evict_expired(&mut entries, key, Instant::now());
            let entry = entries.entry(key.to_string()).or_insert_with(Entry::list);
            match &mut entry.slot {
                Slot::List(items) => items.push_back(value.to_vec()),
                Slot::Bytes(_) => {
                    return Err(BrokerError::WrongType {
                        key: key.to_string(),
                    });
                }
            }
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    /// `keys` を先頭から順に見て、最初に空でない list から取り出す。
    /// `Duration::ZERO` の場合は待たずに 1 回だけ確認する。
    async fn blocking_pop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, Vec<u8>)>, BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut entries = self.entries.lock().await;
                let now = Instant::now();
                for key in keys {
                    evict_expired(&mut entries, key, now);
                    let (value, drained) = match entries.get_mut(key.as_str()) {
                        None => continue,
                        Some(Entry {
                            slot: Slot::Bytes(_),
                            ..
                        }) => return Err(BrokerError::WrongType { key: key.clone() }),
                        Some(Entry {
                            slot: Slot::List(items),
                            ..
                        }) => (items.pop_front(), items.is_empty()),
                    };
                    if drained {
                        entries.remove(key.as_str());
                    }
                    if let Some(value) = value {
                        return Ok(Some((key.clone(), value)));
                    }
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), BrokerError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Bytes(value.to_vec()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BrokerError> {
        let mut entries = self.entries.lock().await;
        evict_expired(&mut entries, key, Instant::now());
        match entries.get(key).map(|e| &e.slot) {
            None => Ok(None),
            Some(Slot::Bytes(value)) => Ok(Some(value.clone())),
            Some(Slot::List(_)) => Err(BrokerError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BrokerError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        evict_expired(&mut entries, key, now);
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn list_members(&self, key: &str) -> Result<Vec<String>, BrokerError> {
        let mut entries = self.entries.lock().await;
        evict_expired(&mut entries, key, Instant::now());
        match entries.get(key).map(|e| &e.slot) {
            None => Ok(Vec::new()),
            Some(Slot::List(items)) => Ok(items
                .iter()
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .collect()),
            Some(Slot::Bytes(_)) => Err(BrokerError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn remove_from_list(&self, key: &str, value: &str) -> Result<(), BrokerError> {
        let mut entries = self.entries.lock().await;
        evict_expired(&mut entries, key, Instant::now());
        let drained = match entries.get_mut(key).map(|e| &mut e.slot) {
            None => return Ok(()),
            Some(Slot::Bytes(_)) => {
                return Err(BrokerError::WrongType {
                    key: key.to_string(),
                });
            }
            Some(Slot::List(items)) => {
                items.retain(|v| v.as_slice() != value.as_bytes());
                items.is_empty()
            }
        };
        if drained {
            entries.remove(key);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BrokerError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, BrokerError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, e| !e.is_expired(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| glob_match(pattern.as_bytes(), k.as_bytes()))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
