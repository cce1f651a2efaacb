//! HandlerRegistry - broker キーから登録情報への対応表
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権（worker に handler を渡すため）

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::handler::{DynHandler, Handler, TypedHandler};
use crate::domain::keys::delivery_key;

/// 1 件の登録情報: (handler, response queue?, db key prefix?)
#[derive(Clone)]
pub struct Registration {
    /// 登録時のキュー名（ErrorRecord の `func` になる）
    pub queue: String,
    pub handler: Arc<dyn DynHandler>,
    pub response_queue: Option<String>,
    pub db_key_prefix: Option<String>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("queue", &self.queue)
            .field("response_queue", &self.response_queue)
            .field("db_key_prefix", &self.db_key_prefix)
            .finish_non_exhaustive()
    }
}

/// HandlerRegistry は `<queue>:<instance>` → Registration を管理
///
/// # 使用例
/// ```ignore
/// let mut registry = HandlerRegistry::new("node-1");
/// registry.insert("echo", Arc::new(handler_fn(echo)), Some("echo.out"), None);
/// let reg = registry.get("echo:node-1");
/// ```
///
/// # 設計
/// - 同じキーへの再登録は上書き（last registration wins）
/// - instance 内だけの対応表。broker 側の hook 登録は HookRegistry の仕事
#[derive(Debug)]
pub struct HandlerRegistry {
    instance_id: String,
    registrations: HashMap<String, Registration>,
}

impl HandlerRegistry {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            registrations: HashMap::new(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Register `handler` for `queue`; returns the registration it replaced.
    pub fn insert(
        &mut self,
        queue: &str,
        handler: Arc<dyn DynHandler>,
        response_queue: Option<&str>,
        db_key_prefix: Option<&str>,
    ) -> Option<Registration> {
        let key = delivery_key(queue, &self.instance_id);
        self.registrations.insert(
            key,
            Registration {
                queue: queue.to_string(),
                handler,
                response_queue: response_queue.map(str::to_string),
                db_key_prefix: db_key_prefix.map(str::to_string),
            },
        )
    }

    /// Typed variant of [`insert`](Self::insert).
    pub fn insert_typed<I, H>(
        &mut self,
        queue: &str,
        handler: H,
        response_queue: Option<&str>,
        db_key_prefix: Option<&str>,
    ) -> Option<Registration>
    where
        I: DeserializeOwned + Send + 'static,
        H: Handler<I> + 'static,
    {
        let handler: Arc<dyn DynHandler> = Arc::new(TypedHandler::<I, H>::new(handler));
        self.insert(queue, handler, response_queue, db_key_prefix)
    }

    pub fn get(&self, key: &str) -> Option<&Registration> {
        self.registrations.get(key)
    }

    /// Current watch set, sorted so pops scan keys in a stable order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.registrations.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Envelope;
    use crate::typed::handler::{HandlerError, handler_fn};
    use serde_json::{Map, Value, json};

    fn constant(tag: &'static str) -> Arc<dyn DynHandler> {
        Arc::new(handler_fn(move |_obj, _meta| async move {
            Ok::<_, HandlerError>(json!({ "tag": tag }))
        }))
    }

    #[test]
    fn test_insert_and_get() {
        let mut registry = HandlerRegistry::new("n1");
        registry.insert("echo", constant("a"), Some("echo.out"), Some("res:"));

        let reg = registry.get("echo:n1").unwrap();
        assert_eq!(reg.queue, "echo");
        assert_eq!(reg.response_queue.as_deref(), Some("echo.out"));
        assert_eq!(reg.db_key_prefix.as_deref(), Some("res:"));
        assert!(registry.get("echo").is_none());
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let mut registry = HandlerRegistry::new("n1");
        assert!(registry.insert("echo", constant("first"), None, None).is_none());
        let replaced = registry.insert("echo", constant("second"), Some("out"), None);
        assert_eq!(replaced.map(|r| r.queue), Some("echo".to_string()));
        assert_eq!(registry.len(), 1);

        let reg = registry.get("echo:n1").unwrap();
        let meta = Envelope::request("1", Value::Null, Map::new());
        let out = reg.handler.call(Map::new(), &meta).await.unwrap();
        assert_eq!(out, json!({"tag": "second"}));
        assert_eq!(reg.response_queue.as_deref(), Some("out"));
    }

    #[test]
    fn test_keys_are_namespaced_and_sorted() {
        let mut registry = HandlerRegistry::new("n1");
        registry.insert("zeta", constant("z"), None, None);
        registry.insert("alpha", constant("a"), None, None);

        assert_eq!(
            registry.keys(),
            vec!["alpha:n1".to_string(), "zeta:n1".to_string()]
        );
        assert!(!registry.is_empty());
    }
}
