use std::fmt;

#[derive(Debug)]
pub enum RelayError {
    Config(String),
    DependencyInit(String),
    TransientTransport(String),
    FatalStartup(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Config(msg) => write!(f, "config error: {}", msg),
            RelayError::DependencyInit(msg) => write!(f, "dependency init error: {}", msg),
            RelayError::TransientTransport(msg) => write!(f, "transport error: {}", msg),
            RelayError::FatalStartup(msg) => write!(f, "fatal startup error: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {}

impl RelayError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        RelayError::Config(msg.into())
    }

    pub fn dependency_init<S: Into<String>>(msg: S) -> Self {
        RelayError::DependencyInit(msg.into())
    }

    pub fn transient<S: Into<String>>(msg: S) -> Self {
        RelayError::TransientTransport(msg.into())
    }
}
