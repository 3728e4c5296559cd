pub mod client;
pub mod consumer;

pub use client::{AdminApi, BrokerConnector, KafkaConnector, TopicPartition};
pub use consumer::EndOffsetCursor;

#[cfg(test)]
pub mod testing;
