//! Error types for broker connections.
//!
//! Two layers of failure live here: [`Error`], which covers everything that
//! can go wrong on our side of the socket (dead connections, framing
//! violations, protocol desync, shutdown), and [`KafkaCode`], the numeric
//! error codes a broker embeds in its responses.
//!
//! Every submitted request resolves its callback exactly once with a
//! `Result`; these are the errors that flow through those callbacks.

use bytes::Bytes;
use num_derive::FromPrimitive;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Dialing the broker failed.
    #[error("unable to dial: {0:?}")]
    Dial(std::io::ErrorKind),

    /// A raw socket read or write failed. The connection is killed and the
    /// next request to this broker dials a fresh one.
    #[error("connection died: {0:?}")]
    DeadConnection(std::io::ErrorKind),

    /// The client's root shutdown signal fired.
    #[error("client is closing")]
    ClientClosing,

    /// The broker was permanently stopped, or the connection chosen for
    /// this request died before it could be serviced.
    #[error("chosen broker is dead")]
    ChosenBrokerDead,

    /// The caller cancelled the request.
    #[error("request cancelled by caller")]
    RequestCancelled,

    /// The request's API key is outside our key table or excluded by the
    /// configured max-versions allow-list.
    #[error("unknown request key {0}")]
    UnknownRequestKey(i16),

    /// The broker's maximum supported version for this API is below the
    /// configured minimum, or the broker does not speak the API at all.
    #[error("broker is too old for the requested API version")]
    BrokerTooOld,

    /// The response's correlation id did not match the request's. The
    /// connection is desynced and must die.
    #[error("correlation id mismatch: wrote {expected}, read {got}")]
    CorrelationIdMismatch { expected: i32, got: i32 },

    /// A response frame advertised a negative size.
    #[error("invalid negative response size {0}")]
    NegativeResponseSize(i32),

    /// A response frame advertised a size above `max_broker_read_bytes`.
    #[error("invalid large response size {size} > limit {limit}")]
    ResponseTooLarge { size: i32, limit: i32 },

    /// An oversized frame whose first bytes look like a TLS alert record.
    /// Almost always a plaintext connection speaking to a TLS endpoint.
    #[error("invalid large response size {size} > limit {limit}; the first three bytes received appear to be a tls alert record for {version}; is this a plaintext connection speaking to a tls endpoint?")]
    TlsAlert {
        size: i32,
        limit: i32,
        version: String,
    },

    /// A response frame was too short to contain a correlation id.
    #[error("not enough data in response")]
    NotEnoughData,

    /// A value could not be rendered into the wire format.
    #[error("error encoding request")]
    EncodingError,

    /// Response bytes did not parse as the expected message.
    #[error("error parsing response: {0:?}")]
    ParsingError(Bytes),

    /// The broker replied with a Kafka error code.
    #[error("kafka error: {0:?}")]
    KafkaError(KafkaCode),

    /// The broker replied with a Kafka error code and an explanation.
    #[error("{message}: {code:?}")]
    ServerError { code: KafkaCode, message: String },

    /// ApiVersions replied `UNSUPPORTED_VERSION` to a version 0 request.
    #[error("broker replied UNSUPPORTED_VERSION to ApiVersions v0")]
    ApiVersionsRejected,

    /// ApiVersions replied with fewer bytes than an error code.
    #[error("invalid {0} byte short response from ApiVersions")]
    ShortApiVersions(usize),

    /// ApiVersions succeeded but advertised no keys.
    #[error("ApiVersions response invalidly contained no api keys")]
    EmptyApiVersions,

    /// None of the configured SASL mechanisms intersect what the broker
    /// supports, or a mechanism name could not be used.
    #[error("invalid sasl mechanism")]
    InvalidSaslMechanism,

    /// A SASL mechanism expected to start with a client write did not.
    #[error("unexpected server-write sasl with mechanism {0}")]
    SaslServerWrite(String),

    /// The broker granted a SASL session shorter than we tolerate.
    #[error("invalid short sasl session lifetime {0}ms")]
    InvalidSaslLifetime(i64),
}

/// Kafka server error codes.
///
/// These are returned inside responses; `0` (`None`) means no error. Codes
/// the client does not recognize map to [`KafkaCode::Unknown`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
pub enum KafkaCode {
    /// The server experienced an unexpected error when processing the
    /// request.
    Unknown = -1,
    None = 0,
    /// The requested offset is not within the range of offsets maintained
    /// by the server.
    OffsetOutOfRange = 1,
    /// This message has failed its CRC checksum, exceeds the valid size,
    /// has a null key for a compacted topic, or is otherwise corrupt.
    CorruptMessage = 2,
    /// This server does not host this topic-partition.
    UnknownTopicOrPartition = 3,
    /// The requested fetch size is invalid.
    InvalidFetchSize = 4,
    /// There is no leader for this topic-partition as we are in the middle
    /// of a leadership election.
    LeaderNotAvailable = 5,
    /// This server is not the leader for that topic-partition.
    NotLeaderForPartition = 6,
    /// The request timed out.
    RequestTimedOut = 7,
    /// The broker is not available.
    BrokerNotAvailable = 8,
    /// The replica is not available for the requested topic-partition.
    ReplicaNotAvailable = 9,
    /// The request included a message larger than the max message size the
    /// server will accept.
    MessageTooLarge = 10,
    /// The controller moved to another broker.
    StaleControllerEpoch = 11,
    /// The metadata field of the offset request was too large.
    OffsetMetadataTooLarge = 12,
    /// The server disconnected before a response was received.
    NetworkException = 13,
    /// The coordinator is loading and hence can't process requests.
    CoordinatorLoadInProgress = 14,
    /// The coordinator is not available.
    CoordinatorNotAvailable = 15,
    /// This is not the correct coordinator.
    NotCoordinator = 16,
    /// The request attempted to perform an operation on an invalid topic.
    InvalidTopicException = 17,
    /// The request included message batch larger than the configured
    /// segment size on the server.
    RecordListTooLarge = 18,
    /// Messages are rejected since there are fewer in-sync replicas than
    /// required.
    NotEnoughReplicas = 19,
    /// Messages are written to the log, but to fewer in-sync replicas than
    /// required.
    NotEnoughReplicasAfterAppend = 20,
    /// Produce request specified an invalid value for required acks.
    InvalidRequiredAcks = 21,
    /// Specified group generation id is not valid.
    IllegalGeneration = 22,
    /// The group member's supported protocols are incompatible with those
    /// of existing members.
    InconsistentGroupProtocol = 23,
    /// The configured groupId is invalid.
    InvalidGroupId = 24,
    /// The coordinator is not aware of this member.
    UnknownMemberId = 25,
    /// The session timeout is not within the range allowed by the broker.
    InvalidSessionTimeout = 26,
    /// The group is rebalancing, so a rejoin is needed.
    RebalanceInProgress = 27,
    /// The committing offset data size is not valid.
    InvalidCommitOffsetSize = 28,
    /// Not authorized to access topics.
    TopicAuthorizationFailed = 29,
    /// Not authorized to access group.
    GroupAuthorizationFailed = 30,
    /// Cluster authorization failed.
    ClusterAuthorizationFailed = 31,
    /// The timestamp of the message is out of acceptable range.
    InvalidTimestamp = 32,
    /// The broker does not support the requested SASL mechanism.
    UnsupportedSaslMechanism = 33,
    /// Request is not valid given the current SASL state.
    IllegalSaslState = 34,
    /// The version of API is not supported.
    UnsupportedVersion = 35,
    /// Topic with this name already exists.
    TopicAlreadyExists = 36,
    /// Number of partitions is below 1.
    InvalidPartitions = 37,
    /// Replication factor is below 1 or larger than the number of
    /// available brokers.
    InvalidReplicationFactor = 38,
    /// Replica assignment is invalid.
    InvalidReplicaAssignment = 39,
    /// Configuration is invalid.
    InvalidConfig = 40,
    /// This is not the correct controller for this cluster.
    NotController = 41,
    /// This most likely occurs because of a request being malformed by the
    /// client library or the message was sent to an incompatible broker.
    InvalidRequest = 42,
    /// The message format version on the broker does not support the
    /// request.
    UnsupportedForMessageFormat = 43,
    /// Request parameters do not satisfy the configured policy.
    PolicyViolation = 44,
    /// The broker received an out of order sequence number.
    OutOfOrderSequenceNumber = 45,
    /// The broker received a duplicate sequence number.
    DuplicateSequenceNumber = 46,
    /// Producer attempted an operation with an old epoch.
    InvalidProducerEpoch = 47,
    /// The producer attempted a transactional operation in an invalid
    /// state.
    InvalidTxnState = 48,
    /// The producer attempted to use a producer id which is not currently
    /// assigned to its transactional id.
    InvalidProducerIdMapping = 49,
    /// The transaction timeout is larger than the maximum value allowed by
    /// the broker.
    InvalidTransactionTimeout = 50,
    /// The producer attempted to update a transaction while another
    /// concurrent operation on the same transaction was ongoing.
    ConcurrentTransactions = 51,
    /// Indicates that the transaction coordinator sending a WriteTxnMarker
    /// is no longer the current coordinator for a given producer.
    TransactionCoordinatorFenced = 52,
    /// Transactional Id authorization failed.
    TransactionalIdAuthorizationFailed = 53,
    /// Security features are disabled.
    SecurityDisabled = 54,
    /// The broker did not attempt to execute this operation.
    OperationNotAttempted = 55,
    /// Disk error when trying to access log file on the disk.
    KafkaStorageError = 56,
    /// The user-specified log directory is not found in the broker config.
    LogDirNotFound = 57,
    /// SASL Authentication failed.
    SaslAuthenticationFailed = 58,
    /// This exception is raised by the broker if it could not locate the
    /// producer metadata associated with the producerId in question.
    UnknownProducerId = 59,
    /// A partition reassignment is in progress.
    ReassignmentInProgress = 60,
    /// Delegation Token feature is not enabled.
    DelegationTokenAuthDisabled = 61,
    /// Delegation Token is not found on server.
    DelegationTokenNotFound = 62,
    /// Specified Principal is not valid Owner/Renewer.
    DelegationTokenOwnerMismatch = 63,
    /// Delegation Token requests are not allowed on this connection.
    DelegationTokenRequestNotAllowed = 64,
    /// Delegation Token authorization failed.
    DelegationTokenAuthorizationFailed = 65,
    /// Delegation Token is expired.
    DelegationTokenExpired = 66,
    /// Supplied principalType is not supported.
    InvalidPrincipalType = 67,
    /// The group is not empty.
    NonEmptyGroup = 68,
    /// The group id does not exist.
    GroupIdNotFound = 69,
    /// The fetch session ID was not found.
    FetchSessionIdNotFound = 70,
    /// The fetch session epoch is invalid.
    InvalidFetchSessionEpoch = 71,
    /// There is no listener on the leader broker that matches the
    /// listener on which metadata request was processed.
    ListenerNotFound = 72,
    /// Topic deletion is disabled.
    TopicDeletionDisabled = 73,
    /// The leader epoch in the request is older than the epoch on the
    /// broker.
    FencedLeaderEpoch = 74,
    /// The leader epoch in the request is newer than the epoch on the
    /// broker.
    UnknownLeaderEpoch = 75,
    /// The requesting client does not support the compression type of
    /// given partition.
    UnsupportedCompressionType = 76,
    /// Broker epoch has changed.
    StaleBrokerEpoch = 77,
    /// The leader high watermark has not caught up from a recent leader
    /// election so the offsets cannot be guaranteed to be monotonically
    /// increasing.
    OffsetNotAvailable = 78,
    /// The group member needs to have a valid member id before actually
    /// entering a consumer group.
    MemberIdRequired = 79,
    /// The preferred leader was not available.
    PreferredLeaderNotAvailable = 80,
    /// The consumer group has reached its max size.
    GroupMaxSizeReached = 81,
    /// The broker rejected this static consumer since another consumer
    /// with the same group.instance.id has registered with a different
    /// member.id.
    FencedInstanceId = 82,
}

#[cfg(test)]
mod test {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn kafka_code_from_wire_value() {
        assert_eq!(KafkaCode::from_i16(0), Some(KafkaCode::None));
        assert_eq!(KafkaCode::from_i16(33), Some(KafkaCode::UnsupportedSaslMechanism));
        assert_eq!(KafkaCode::from_i16(35), Some(KafkaCode::UnsupportedVersion));
        assert_eq!(KafkaCode::from_i16(58), Some(KafkaCode::SaslAuthenticationFailed));
        assert_eq!(KafkaCode::from_i16(-1), Some(KafkaCode::Unknown));
        assert_eq!(KafkaCode::from_i16(4000), None);
    }

    #[test]
    fn tls_alert_error_names_the_version() {
        let err = Error::TlsAlert {
            size: 352_585_471,
            limit: 100 << 20,
            version: "TLS v1.2".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("TLS v1.2"));
        assert!(msg.contains("tls alert record"));
    }
}
