//! Worker - 1 メッセージ分の実行
//!
//! # フロー
//! 1. handler を `obj`（名前付き引数）と `meta`（request 全体）で呼ぶ
//! 2. 成功: 出力の null を "" に正規化して 200 の envelope
//! 3. 失敗（Err / panic / 不正な出力）: ErrorRecord を作って 500 の envelope、`msg:error` にも broadcast
//! 4. どちらの場合も ResultPublisher で publish
//!
//! 失敗は WorkerOutcome::Failed として呼び出し元（dispatch loop）に返す。ログはそちらの仕事。

use std::any::Any;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::publisher::ResultPublisher;
use crate::domain::envelope::USER_MESSAGE;
use crate::domain::keys::ERROR_QUEUE;
use crate::domain::normalize::none_to_blank;
use crate::domain::{Envelope, EnvelopeCodec, ErrorRecord, RelayError};
use crate::typed::{HandlerError, Registration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Succeeded,
    Failed(ErrorRecord),
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "handler panicked".to_string(),
        },
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// handler を別タスクで動かし、panic も HandlerError として回収する
async fn invoke(
    registration: &Registration,
    request: &Envelope,
) -> Result<Map<String, Value>, HandlerError> {
    let handler = Arc::clone(&registration.handler);
    let meta = request.clone();
    let joined = tokio::spawn(async move {
        let obj = meta.obj.clone();
        handler.call(obj, &meta).await
    })
    .await;

    let output = match joined {
        Ok(result) => result?,
        Err(err) if err.is_panic() => {
            return Err(HandlerError::panicked(panic_message(err.into_panic())));
        }
        Err(err) => return Err(HandlerError::new(err.to_string()).with_kind("cancelled")),
    };

    match output {
        Value::Object(obj) => Ok(obj),
        Value::Null => Ok(Map::new()),
        other => Err(HandlerError::invalid_output(format!(
            "handler returned {} instead of an object",
            value_kind(&other)
        ))),
    }
}

fn error_record(err: &HandlerError, registration: &Registration) -> ErrorRecord {
    ErrorRecord {
        internal_message: err.message().to_string(),
        exc_type: err.kind().to_string(),
        exc_value: err.message().to_string(),
        exc_traceback: err.trace(),
        user_message: USER_MESSAGE.to_string(),
        func: registration.queue.clone(),
        msg_key: registration.response_queue.clone(),
    }
}

/// Execute one request end to end.
///
/// `Err` means publishing failed (broker / encode), not that the handler failed.
pub async fn execute(
    publisher: &ResultPublisher,
    registration: &Registration,
    request: Envelope,
) -> Result<WorkerOutcome, RelayError> {
    let (response, outcome) = match invoke(registration, &request).await {
        Ok(obj) => (
            Envelope::success(&request, none_to_blank(obj)),
            WorkerOutcome::Succeeded,
        ),
        Err(err) => {
            let record = error_record(&err, registration);
            (
                Envelope::failure(&request, record.clone()),
                WorkerOutcome::Failed(record),
            )
        }
    };

    let bytes = EnvelopeCodec::encode(&response)?;
    // the regular publish runs even if the error-queue copy failed
    let copied = match &outcome {
        WorkerOutcome::Failed(_) => publisher.broadcast(ERROR_QUEUE, &bytes).await.map(|_| ()),
        WorkerOutcome::Succeeded => Ok(()),
    };
    publisher
        .publish(
            registration.response_queue.as_deref(),
            registration.db_key_prefix.as_deref(),
            &response.id,
            &bytes,
        )
        .await?;
    copied?;

    Ok(outcome)
}
