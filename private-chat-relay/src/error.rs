/// Everything a relay session can reject. The `Display` text is sent
/// verbatim to the client inside an `error` message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid JSON")]
    MalformedJson,

    #[error("{0}")]
    ProtocolViolation(&'static str),

    #[error("Empty username")]
    EmptyUsername,

    #[error("Username already taken")]
    NameTaken,

    #[error("{0} is not online")]
    TargetOffline(String),

    #[error("You cannot chat with yourself")]
    SelfPairing,

    #[error("You are already in a chat. Use /leave first.")]
    AlreadyPaired,

    #[error("{0} is busy")]
    TargetBusy(String),

    #[error("You are not in a private chat. Use /chat <name>.")]
    NotInChat,

    #[error("Peer disconnected")]
    PeerDisconnected,
}

impl RelayError {
    pub const JOIN_REQUIRED: RelayError =
        RelayError::ProtocolViolation("First message must be join with username");
    pub const UNKNOWN_TYPE: RelayError = RelayError::ProtocolViolation("Unknown message type");
    pub const INVALID_FIELDS: RelayError = RelayError::ProtocolViolation("Invalid message fields");
    pub const ALREADY_JOINED: RelayError = RelayError::ProtocolViolation("Already joined");
    pub const MISSING_TARGET: RelayError = RelayError::ProtocolViolation("Missing 'to' username");
}
