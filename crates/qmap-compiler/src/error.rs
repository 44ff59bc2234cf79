// error.rs — fatal error taxonomy
//
// Recoverable conditions (degenerate faces, invalid projections, mixed
// contents, ...) are repaired in place and logged; only structural map
// damage and internal invariant violations surface as MapError.

use qmap_common::parser::Location;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapError {
    #[error("{location}: {message}")]
    Parse { location: Location, message: String },

    #[error("couldn't load map file \"{path}\": {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't write \"{path}\": {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl MapError {
    pub fn parse(location: Location, message: impl Into<String>) -> Self {
        MapError::Parse {
            location,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MapError>;
