//! Errors from loading and persisting `ghostnet.ron`.

/// Why the server config could not be loaded or written.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `ghostnet.ron` exists but could not be read.
    #[error("cannot read ghostnet.ron: {0}")]
    ReadError(#[source] std::io::Error),

    /// The config directory or file could not be written.
    #[error("cannot write ghostnet.ron: {0}")]
    WriteError(#[source] std::io::Error),

    /// The file is not valid RON for [`Config`](crate::Config).
    #[error("invalid ghostnet.ron: {0}")]
    ParseError(#[source] ron::error::SpannedError),

    #[error("cannot serialize config: {0}")]
    SerializeError(#[source] ron::Error),

    /// The platform has no config directory and none was given.
    #[error("no config directory available, pass --config")]
    NoConfigDir,
}
