pub mod candle;
pub mod query;
pub mod ticker;
pub mod timestamp;
