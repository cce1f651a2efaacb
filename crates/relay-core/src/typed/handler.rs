//! Handler trait - キューに紐づける処理の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<I>)
//! - Object-safe trait (DynHandler)
//! - Type erasure パターン (TypedHandler<I, H> / FnHandler<F> → DynHandler)

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::domain::Envelope;

/// HandlerError は handler の失敗
///
/// dispatch loop を止めるエラーではなく、500 の response envelope になる。
/// `kind` は exc_type、`message` は exc_value、`source` の連鎖は exc_traceback に描画される。
#[derive(Debug)]
pub struct HandlerError {
    kind: String,
    message: String,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: "HandlerError".to_string(),
            message: message.into(),
            source: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Wrap any error, keeping its type name as the kind.
    pub fn from_error<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub fn invalid_input(err: serde_json::Error) -> Self {
        Self::from_error(err).with_kind("InvalidInput")
    }

    pub fn invalid_output(message: impl Into<String>) -> Self {
        Self::new(message).with_kind("InvalidOutput")
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(message).with_kind("panic")
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Rendered cause chain, outermost first, one cause per line.
    pub fn trace(&self) -> String {
        let mut lines = Vec::new();
        let mut cause: Option<&(dyn StdError + 'static)> = match &self.source {
            Some(source) => Some(source.as_ref()),
            None => None,
        };
        while let Some(err) = cause {
            lines.push(err.to_string());
            cause = err.source();
        }
        lines.join("\n")
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for HandlerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.source {
            Some(source) => Some(source.as_ref()),
            None => None,
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::from_error(err)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Handler は request の `obj` を型 `I` として受け取る
///
/// # 使用例
/// ```ignore
/// #[derive(Deserialize)]
/// struct Charge { amount: u64 }
///
/// struct ChargeHandler;
///
/// #[async_trait]
/// impl Handler<Charge> for ChargeHandler {
///     type Output = serde_json::Value;
///     async fn handle(&self, input: Charge, _meta: &Envelope) -> Result<Self::Output, HandlerError> {
///         Ok(json!({ "charged": input.amount }))
///     }
/// }
/// ```
///
/// # ジェネリクスによる型安全性
/// - `obj` が `I` にデシリアライズできなければ InvalidInput の失敗になる
/// - `Output` は JSON オブジェクトにシリアライズされる必要がある
#[async_trait]
pub trait Handler<I: DeserializeOwned + Send + 'static>: Send + Sync {
    type Output: Serialize + Send;

    async fn handle(&self, input: I, meta: &Envelope) -> Result<Self::Output, HandlerError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// `obj` は名前付き引数、`meta` は decode 済みの request envelope 全体。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn call(&self, obj: Map<String, Value>, meta: &Envelope) -> Result<Value, HandlerError>;
}

pub struct TypedHandler<I, H> {
    handler: H,
    _marker: PhantomData<fn(I)>,
}

impl<I, H> TypedHandler<I, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<I, H> DynHandler for TypedHandler<I, H>
where
    I: DeserializeOwned + Send + 'static,
    H: Handler<I>,
{
    async fn call(&self, obj: Map<String, Value>, meta: &Envelope) -> Result<Value, HandlerError> {
        let input: I =
            serde_json::from_value(Value::Object(obj)).map_err(HandlerError::invalid_input)?;
        let output = self.handler.handle(input, meta).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Closure adapter; see [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> DynHandler for FnHandler<F>
where
    F: Fn(Map<String, Value>, Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn call(&self, obj: Map<String, Value>, meta: &Envelope) -> Result<Value, HandlerError> {
        (self.f)(obj, meta.clone()).await
    }
}

/// Build a handler from an async closure taking `(obj, meta)`.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Map<String, Value>, Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    FnHandler { f }
}
