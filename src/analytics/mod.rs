pub mod aggregator;
pub mod pipeline;
pub mod transformer;
