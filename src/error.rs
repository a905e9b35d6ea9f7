//! Error type for the library surface.
//!
//! Only construction and startup can fail with a typed error. Individual
//! calls report failure as the absence of a result; the details go to the
//! log instead.

use std::io;
use std::path::PathBuf;

/// Errors returned by `Server` and `Client` constructors and by
/// `Server::start`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The socket path does not fit in `sun_path`.
    #[error("socket path {0:?} exceeds the platform limit of {1} bytes")]
    PathTooLong(PathBuf, usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
