pub mod clickhouse_store;
pub mod memory;
pub mod producer;
pub mod writer;
