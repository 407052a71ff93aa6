//! 도메인 모델.

pub mod candle;
pub mod codec;

pub use candle::{datetime_from_ms, Candle, SYNC_EPOCH_MS};
pub use codec::{decode_batch, encode_batch};
