use super::error::Error;
use super::logging;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("bogus");
}

#[test]
fn only_transient_errors_are_retryable() {
    assert!(Error::transient("broker down").is_retryable());
    assert!(!Error::permanent("bad envelope").is_retryable());
    assert!(!Error::Cancelled.is_retryable());
    assert!(!Error::ResourceExhausted("queue".into()).is_retryable());
    assert!(!Error::Closed("publisher").is_retryable());
}

#[test]
fn kafka_errors_are_classified() {
    let transient: Error =
        KafkaError::MessageProduction(RDKafkaErrorCode::BrokerTransportFailure).into();
    assert!(transient.is_retryable());

    let denied: Error =
        KafkaError::MessageProduction(RDKafkaErrorCode::TopicAuthorizationFailed).into();
    assert!(matches!(denied, Error::Permanent(_)));

    let creation: Error = KafkaError::ClientCreation("bad config".into()).into();
    assert!(matches!(creation, Error::Permanent(_)));
}
