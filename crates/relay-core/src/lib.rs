//! relay-core
//!
//! Redis のような list / key-value broker の上に作るメッセージ配送層。
//! instance ごとにキューへ handler を登録し、届いた envelope を並列数の上限つきで実行し、
//! 結果（またはエラー）を response queue や TTL 付きキーへ書き戻す。
//!
//! # モジュール構成
//! - **domain**: Envelope, ErrorRecord, キー命名, null 正規化, エラー型
//! - **ports**: Broker trait
//! - **typed**: Handler trait, DynHandler, HandlerRegistry
//! - **app**: Service（builder, dispatch loop, worker, publisher, hook registry）
//! - **impls**: InMemoryBroker, RedisBroker（feature `redis`）
//! - **config**: RelayConfig

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{Service, ServiceBuilder, ShutdownHandle};
pub use config::{DecodeFailurePolicy, RelayConfig};
pub use domain::{Envelope, ErrorRecord, InstanceId, RelayError};
pub use ports::{Broker, BrokerError};
pub use typed::{DynHandler, Handler, HandlerError, handler_fn};
