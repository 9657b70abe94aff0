pub mod candle_source;
pub mod metric_store;
pub mod row_publisher;
