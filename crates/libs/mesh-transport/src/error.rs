#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport {0} is not active")]
    NotActive(&'static str),

    #[error("endpoint {0} is unknown to this transport")]
    UnknownEndpoint(String),

    #[error("payload of {0} bytes exceeds the {1} byte limit for this transport")]
    PayloadTooLarge(usize, usize),

    #[error("packet codec error: {0}")]
    Codec(#[from] mesh_protocol::CodecError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport send channel closed")]
    ChannelClosed,
}
