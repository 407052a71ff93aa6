//! # Kline Exchange
//!
//! 거래소에서 캔들 데이터를 조회하는 클라이언트를 제공합니다.
//!
//! - [`ExchangeClient`]: 조회 인터페이스
//! - [`BinanceClient`]: Binance REST 구현
//! - [`ScriptedExchange`]: 미리 정해둔 응답을 돌려주는 테스트 더블

pub mod binance;
pub mod error;
pub mod scripted;
pub mod traits;

pub use binance::BinanceClient;
pub use error::ExchangeError;
pub use scripted::{FetchCall, ScriptedExchange};
pub use traits::{ExchangeClient, ExchangeResult};
