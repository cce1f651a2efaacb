//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryBroker**: 開発・テスト用
//! - **RedisBroker**: 本番用（feature `redis`）

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use self::memory::InMemoryBroker;
#[cfg(feature = "redis")]
pub use self::redis::RedisBroker;
