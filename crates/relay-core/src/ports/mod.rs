//! Ports - 抽象化レイヤー
//!
//! 外部システム（Redis など）へのインターフェースを trait として定義し、
//! 実装の詳細を隠蔽する。

pub mod broker;

pub use self::broker::{Broker, BrokerError};
