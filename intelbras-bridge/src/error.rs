//! Runtime error taxonomy. Wire-parsing errors live in `isecnet-proto`;
//! these variants concern session/runtime state.

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("missing or invalid configuration: {0}")]
    Config(String),

    #[error("no connection registered for {0}")]
    ConnectionNotFound(String),

    #[error("panel refused the command: {message} (code {code:#04x})")]
    Nack { code: u8, message: &'static str },

    #[error("no response within the dispatch timeout")]
    ResponseTimeout,

    #[error("legacy auth rejected: {0:?}")]
    Auth(isecnet_proto::amt8000::AuthResult),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("external I/O failure: {0}")]
    ExternalIo(String),
}
