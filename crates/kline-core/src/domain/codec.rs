//! 스트림 전송용 캔들 배치 코덱.
//!
//! 배치는 JSON 배열로 직렬화됩니다. 모든 필드는 필수이며, 누락된 필드는
//! 0으로 채우지 않고 코덱 에러로 처리합니다.

use crate::domain::candle::Candle;
use crate::error::CoreResult;

/// 캔들 배치를 바이트로 직렬화합니다.
pub fn encode_batch(candles: &[Candle]) -> CoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(candles)?)
}

/// 바이트를 캔들 배치로 역직렬화합니다.
pub fn decode_batch(payload: &[u8]) -> CoreResult<Vec<Candle>> {
    Ok(serde_json::from_slice(payload)?)
}
