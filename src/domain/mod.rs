//! Immutable value types and identities shared across the pipeline, the
//! candle aggregator and the alert engine.

pub mod alert;
pub mod candle;
pub mod exchange_status;
pub mod instrument;
pub mod interval;
pub mod tick;

pub use alert::{AlertHistory, AlertRule, RuleId, RuleKind};
pub use candle::{Candle, CandleKey};
pub use exchange_status::{ExchangeStatus, ExchangeStatusKey};
pub use instrument::{Instrument, InstrumentCache, InstrumentId, InstrumentKey};
pub use interval::CandleInterval;
pub use tick::{NormalizedTick, RawTick, SourceType};
