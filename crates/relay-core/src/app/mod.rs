//! App - アプリケーション層
//!
//! ports を組み合わせて 1 instance の動作を実装する。
//!
//! # 主要コンポーネント
//! - **ServiceBuilder / Service**: 構築、register、broadcast
//! - **HookRegistry**: `hooks:<queue>` の購読管理と起動時の掃除
//! - **WorkerPool**: 同時実行数の上限（semaphore）
//! - **worker**: 1 メッセージの実行と publish
//! - **ResultPublisher**: response queue への broadcast と TTL 付き保存
//! - **dispatcher**: dispatch loop（Service::run_forever）

pub mod builder;
pub mod dispatcher;
pub mod hooks;
pub mod pool;
pub mod publisher;
pub mod worker;

pub use self::builder::{Service, ServiceBuilder, ShutdownHandle};
pub use self::hooks::HookRegistry;
pub use self::pool::WorkerPool;
pub use self::publisher::ResultPublisher;
pub use self::worker::WorkerOutcome;
