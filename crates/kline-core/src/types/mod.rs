//! 공통 타입.

pub mod timeframe;

pub use timeframe::Timeframe;
