//! # Kline Core
//!
//! 캔들(kline) 동기화 서비스의 핵심 도메인 모델 및 공통 인프라를 제공합니다.
//!
//! - `Candle` 모델과 검증 규칙
//! - 스트림 전송용 배치 코덱
//! - 타임프레임 정의
//! - 설정 관리
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use types::*;
