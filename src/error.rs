use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    /// Any failure reaching or querying the broker.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Broker answered with data we could not interpret.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("HTTP server error: {0}")]
    Http(String),
}

impl ExporterError {
    /// Errors that mean the broker connection is in a bad state and should be
    /// recreated before the next cycle.
    pub const fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable(_) | Self::MalformedResponse(_)
        )
    }
}

impl From<rdkafka::error::KafkaError> for ExporterError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Self::UpstreamUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExporterError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::error::KafkaError;
    use rdkafka::types::RDKafkaErrorCode;

    #[test]
    fn test_kafka_errors_are_upstream() {
        let err: ExporterError =
            KafkaError::MetadataFetch(RDKafkaErrorCode::LeaderNotAvailable).into();
        assert!(err.is_upstream());
        assert!(err.to_string().starts_with("Upstream unavailable"));
    }

    #[test]
    fn test_malformed_is_recoverable_but_config_is_not() {
        assert!(ExporterError::MalformedResponse("offset".into()).is_upstream());
        assert!(!ExporterError::Config("bad".into()).is_upstream());
        assert!(!ExporterError::Http("bind".into()).is_upstream());
    }
}
