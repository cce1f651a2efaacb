//! Typed - handler API と登録表
//!
//! # 二層構造
//! - **表層（Typed）**: `Handler<I>` trait, `handler_fn` - 入力の型を静的に決める
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure

pub mod handler;
pub mod registry;

pub use self::handler::{DynHandler, FnHandler, Handler, HandlerError, TypedHandler, handler_fn};
pub use self::registry::{HandlerRegistry, Registration};
