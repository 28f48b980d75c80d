use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("could not encode envelope")]
    Encode(#[source] bincode::Error),

    #[error("could not decode envelope")]
    Decode(#[source] bincode::Error),

    #[error("expected a network envelope, got {0}")]
    NotANetworkMessage(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("could not bind listener on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("could not connect to {addr}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to {addr}")]
    Timeout { addr: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("owner alias must not be empty")]
    EmptyOwner,

    #[error("port {0} is not a valid listening port")]
    InvalidPort(u16),

    #[error("port {0} is configured more than once")]
    DuplicatePort(u16),

    #[error("heartbeat interval must be positive")]
    ZeroHeartbeat,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SystemError {
    #[error("hub sent an empty membership")]
    EmptyMembership,

    #[error("no member listens on {host}:{port}")]
    NotAMember { host: String, port: u16 },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
