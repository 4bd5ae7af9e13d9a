use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("the configuration is invalid: {0}")]
    Configuration(String),
    #[error("the credentials were refused: {0}")]
    Credentials(tokio_xmpp::Error),
    #[error("a network error occurred: {0}")]
    Network(tokio_xmpp::Error),
    #[error("an XMPP parse error occurred: {0}")]
    XmppParse(#[from] xmpp_parsers::Error),
    #[error("the XMPP stream ended")]
    StreamEnded,
    #[error("gave up reconnecting after {0} consecutive failures")]
    ReconnectsExhausted(u32),
    #[error("the alert store could not be persisted: {0}")]
    Store(#[from] std::io::Error),
}

impl Error {
    /// Fatal errors terminate the ingest loop and the process; everything
    /// else is retried with backoff.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::Credentials(_) | Error::ReconnectsExhausted(_)
        )
    }
}

impl From<tokio_xmpp::Error> for Error {
    fn from(e: tokio_xmpp::Error) -> Self {
        match e {
            tokio_xmpp::Error::JidParse(_) => Self::Configuration(e.to_string()),
            tokio_xmpp::Error::Auth(_) => Self::Credentials(e),
            _ => Self::Network(e),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
