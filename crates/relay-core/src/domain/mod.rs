//! Domain model (envelope, keys, normalization, errors).
//!
//! broker や実行モデルには依存しない。メッセージの「形」とキーの命名だけを持つ。

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod keys;
pub mod normalize;

pub use self::codec::EnvelopeCodec;
pub use self::envelope::{Envelope, ErrorRecord, STATUS_HANDLER_FAILED, STATUS_OK};
pub use self::errors::RelayError;
pub use self::keys::{ERROR_QUEUE, InstanceId};
