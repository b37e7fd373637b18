use std::{error, fmt, io};

pub type Result<T, E = Error> = anyhow::Result<T, E>;

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum ErrorKind {
    // Intake errors
    UnsupportedFormat,
    PayloadTooLarge,
    InvalidMapping,
    TemplateNotFound,
    StagingError,

    // Job-level errors
    JobNotFound,
    MissingStagedFile,
    ReaderError,
    InvalidHeader,
    TargetTableError,

    // Transport errors
    QueueError,

    InternalError,
}

#[derive(Debug)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    IoError(io::Error),
    DbError(diesel::result::Error),
    PoolError(r2d2::Error),
    JsonError(serde_json::Error),
    AnyhowError(anyhow::Error),
}

pub struct Error {
    repr: ErrorRepr,
}

impl Error {
    /// Returns the [`ErrorKind`] for descriptive errors, `None` for wrapped
    /// foreign errors.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _) => Some(kind),
            ErrorRepr::WithDescriptionAndDetail(kind, _, _) => Some(kind),
            _ => None,
        }
    }

    /// True when the underlying cause is a database unique constraint
    /// violation.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self.repr,
            ErrorRepr::DbError(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ))
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error {
            repr: ErrorRepr::IoError(err),
        }
    }
}

impl From<diesel::result::Error> for Error {
    fn from(err: diesel::result::Error) -> Error {
        Error {
            repr: ErrorRepr::DbError(err),
        }
    }
}

impl From<r2d2::Error> for Error {
    fn from(err: r2d2::Error) -> Error {
        Error {
            repr: ErrorRepr::PoolError(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error {
            repr: ErrorRepr::JsonError(err),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Error {
        Error {
            repr: ErrorRepr::AnyhowError(err),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Error {
        Error {
            repr: ErrorRepr::AnyhowError(err.into()),
        }
    }
}

impl From<(ErrorKind, &'static str)> for Error {
    fn from((kind, desc): (ErrorKind, &'static str)) -> Error {
        Error {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for Error {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> Error {
        Error {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl error::Error for Error {
    fn cause(&self) -> Option<&dyn error::Error> {
        match self.repr {
            ErrorRepr::IoError(ref err) => Some(err as &dyn error::Error),
            ErrorRepr::DbError(ref err) => Some(err as &dyn error::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.repr {
            ErrorRepr::WithDescription(_, desc) => desc.fmt(f),
            ErrorRepr::WithDescriptionAndDetail(_, desc, ref detail) => {
                desc.fmt(f)?;
                f.write_str(": ")?;
                detail.fmt(f)
            }
            ErrorRepr::IoError(ref err) => err.fmt(f),
            ErrorRepr::DbError(ref err) => err.fmt(f),
            ErrorRepr::PoolError(ref err) => err.fmt(f),
            ErrorRepr::JsonError(ref err) => err.fmt(f),
            ErrorRepr::AnyhowError(ref err) => err.fmt(f),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
