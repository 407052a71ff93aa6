//! 캔들 저장 및 메시지 스트림.
//!
//! 이 crate는 다음을 제공합니다:
//! - [`CandleRepository`]: `(symbol, time)` 키 기반 중복 안전 저장소
//!   - [`TimescaleCandleRepository`]: TimescaleDB 구현
//!   - [`InMemoryCandleRepository`]: 테스트용 구현
//! - [`StreamTransport`]: at-least-once 전달과 수동 ack를 지원하는 발행/구독 채널
//!   - [`RedisStreamTransport`]: Redis Streams 컨슈머 그룹 구현
//!   - [`InMemoryTransport`]: 테스트용 구현

pub mod error;
pub mod memory;
pub mod memory_stream;
pub mod redis_stream;
pub mod repository;
pub mod stream;
pub mod timescale;

pub use error::{DataError, Result};
pub use memory::InMemoryCandleRepository;
pub use memory_stream::{InMemoryTransport, PublishRecord};
pub use redis_stream::RedisStreamTransport;
pub use repository::CandleRepository;
pub use stream::{Acker, Delivery, StreamTransport, Subscription};
pub use timescale::{Database, TimescaleCandleRepository};
