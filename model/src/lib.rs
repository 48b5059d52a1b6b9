pub mod chain;
pub mod event;
pub mod h160_hexadecimal;
pub mod h256_hexadecimal;

pub use chain::{Chain, ChainConfig};
pub use event::{
    EventIndex, EventKind, LedgerEntry, OrderKey, PositionEvent, RawLog, COLLECT_TOPIC,
    DECREASE_LIQUIDITY_TOPIC, INCREASE_LIQUIDITY_TOPIC,
};
