//! Errors - サービス全体のエラー型
//!
//! handler の失敗はここには含まれない（envelope の `error` として data 扱い）。
//! ここにあるのは dispatch loop や起動処理を止めうるエラーだけ。

use thiserror::Error;

use crate::ports::BrokerError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("envelope encode: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("malformed envelope on key={key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no registration for key={0}")]
    UnknownKey(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("config load: {0}")]
    ConfigLoad(#[from] config::ConfigError),
}
