use std::{fmt, io};

/// Errors surfaced by configuration loading, agent-spec parsing, and poller
/// setup. Per-attempt network failures are not represented here; they are
/// billed to the dashboard as an `agent::stats::Outcome` instead (spec §7).
#[derive(Debug)]
pub enum Error {
    /// A config file or agent spec string could not be parsed.
    Config(String),
    /// The underlying readiness poller could not be created or armed.
    Poller(io::Error),
    /// No mirrors were supplied for a group that requires at least one.
    EmptyMirrorGroup,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Config(ref msg) => write!(f, "configuration error: {}", msg),
            Error::Poller(ref e) => write!(f, "poller error: {}", e),
            Error::EmptyMirrorGroup => write!(f, "unable to initialize empty agent"),
        }
    }
}

impl ::std::error::Error for Error {
    fn description(&self) -> &str {
        match *self {
            Error::Config(ref msg) => msg,
            Error::Poller(_) => "poller error",
            Error::EmptyMirrorGroup => "empty mirror group",
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Poller(e)
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;
