//! Broker key naming - キー名の規約
//!
//! # キー空間
//! - `hooks:<queue>`: そのキューを購読している instance id のリスト
//! - `<queue>:<instance>`: instance ごとの配送リスト（request / response envelope）
//! - `<db_key_prefix><id>`: message id ごとの最新 envelope（TTL 付き）
//! - `dead:<key>`: decode できなかった payload の退避先

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// 全 instance 共通のエラー配信キュー
pub const ERROR_QUEUE: &str = "msg:error";

/// startup sweep で走査する hook キーの glob
pub const HOOKS_PATTERN: &str = "hooks:*";

const HOOKS_PREFIX: &str = "hooks:";
const DEAD_LETTER_PREFIX: &str = "dead:";

/// InstanceId はプロセスを識別する不透明な文字列
///
/// 同じキュー名を扱う複数 instance がそれぞれ独立した配送キーを持つために使う。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// ULID から新しい id を作る（operator が id を指定しなかった場合）
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// `<queue>:<instance>`
pub fn delivery_key(queue: &str, instance: &str) -> String {
    format!("{queue}:{instance}")
}

/// `hooks:<queue>`
pub fn hooks_key(queue: &str) -> String {
    format!("{HOOKS_PREFIX}{queue}")
}

/// `<db_key_prefix><id>`
pub fn db_key(prefix: &str, id: &str) -> String {
    format!("{prefix}{id}")
}

/// `dead:<key>`
pub fn dead_letter_key(key: &str) -> String {
    format!("{DEAD_LETTER_PREFIX}{key}")
}
