//! EnvelopeCodec - Envelope と broker の byte 列の相互変換
//!
//! # フロー
//! 1. dispatch loop が broker から bytes を受け取る
//! 2. `decode_request` で id / tracking / obj だけを読む（error と status_code は無視）
//! 3. 失敗時は DecodeFailurePolicy に従う（dead letter / fatal）

use serde::Deserialize;
use serde_json::{Map, Value};

use super::envelope::Envelope;

/// request として読むフィールドだけ
#[derive(Deserialize)]
struct RequestFields {
    id: String,
    #[serde(default)]
    tracking: Value,
    #[serde(default)]
    obj: Map<String, Value>,
}

pub struct EnvelopeCodec;

impl EnvelopeCodec {
    pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(envelope)
    }

    pub fn decode(bytes: &[u8]) -> Result<Envelope, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Decode an incoming request; response-only fields are not validated.
    pub fn decode_request(bytes: &[u8]) -> Result<Envelope, serde_json::Error> {
        let fields: RequestFields = serde_json::from_slice(bytes)?;
        Ok(Envelope::request(fields.id, fields.tracking, fields.obj))
    }
}
