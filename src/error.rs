//! Infrastructure error type.

/// A boxed, thread-safe error used wherever a collaborator reports failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The error type returned by turnstile's fallible setup operations.
///
/// Request-level problems (a route that does not match, a malformed body,
/// an overloaded server) are never `Error`s: they become
/// [`Output`](crate::Output) values and therefore responses. This type only
/// surfaces failures that stop a server from starting: binding a port or
/// loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
