//! Envelope - instance 間でやり取りするメッセージ
//!
//! request も response も同じ形をしている。
//! 成功/失敗は `status_code` と `error` で区別され、別のエラーチャネルは持たない。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const STATUS_OK: u16 = 200;
pub const STATUS_HANDLER_FAILED: u16 = 500;

/// ユーザー向けの固定メッセージ
pub const USER_MESSAGE: &str = "Something went wrong!";

fn default_status() -> u16 {
    STATUS_OK
}

/// Message envelope (wire/storage representation).
///
/// Invariant for published responses: `error.is_none() && status_code == 200`
/// or `error.is_some() && status_code == 500`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// caller が付与する correlation id
    pub id: String,

    /// 解釈せずにそのまま返す値
    #[serde(default)]
    pub tracking: Value,

    /// request では handler の入力、response では handler の出力
    #[serde(default)]
    pub obj: Map<String, Value>,

    #[serde(default)]
    pub error: Option<ErrorRecord>,

    #[serde(default = "default_status")]
    pub status_code: u16,
}

impl Envelope {
    /// producer 側で request を組み立てる
    pub fn request(id: impl Into<String>, tracking: Value, obj: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            tracking,
            obj,
            error: None,
            status_code: STATUS_OK,
        }
    }

    /// request から成功 response を作る（id と tracking を引き継ぐ）
    pub fn success(request: &Envelope, obj: Map<String, Value>) -> Self {
        Self {
            id: request.id.clone(),
            tracking: request.tracking.clone(),
            obj,
            error: None,
            status_code: STATUS_OK,
        }
    }

    /// request から失敗 response を作る。`obj` は空になる。
    pub fn failure(request: &Envelope, error: ErrorRecord) -> Self {
        Self {
            id: request.id.clone(),
            tracking: request.tracking.clone(),
            obj: Map::new(),
            error: Some(error),
            status_code: STATUS_HANDLER_FAILED,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status_code == STATUS_OK
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some() && self.status_code == STATUS_HANDLER_FAILED
    }
}

/// Structured description of a handler failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub internal_message: String,
    pub exc_type: String,
    pub exc_value: String,
    pub exc_traceback: String,
    pub user_message: String,
    /// registered name of the handler (its request queue)
    pub func: String,
    /// response queue of the registration, if any
    pub msg_key: Option<String>,
}
