use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] chord_transport::TransportError),

    #[error(transparent)]
    Crypto(#[from] chord_crypto::CryptoError),

    #[error("storage i/o error for '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("peer returned an unexpected response to {method}")]
    UnexpectedResponse { method: &'static str },
}
