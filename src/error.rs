#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection refused: peer ACKed a sequence number we never sent")]
    ConnectionRefused,

    #[error("port: {0} has been unexpectedly closed")]
    PortClosed(u16),

    #[error("port: {0} already in use")]
    PortInUse(u16),

    #[error("segment codec error: {0}")]
    Codec(#[from] crate::codec::CodecError),
}

pub type Result<T> = std::result::Result<T, Error>;
