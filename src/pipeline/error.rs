//! Pipeline-layer errors.

use std::{fmt, result};

use failure::{Backtrace, Context, Fail};

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    ctx: Context<ErrorKind>,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.ctx.get_context()
    }

    pub fn no_uploader_configured() -> Error {
        ErrorKind::NoUploaderConfigured.into()
    }

    pub fn batch_not_found<S: Into<String>>(id: S) -> Error {
        ErrorKind::BatchNotFound { id: id.into() }.into()
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.ctx.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.ctx.backtrace()
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        self.kind().clone().into()
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        self.kind() == other.kind()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.ctx, f)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Fail)]
pub enum ErrorKind {
    #[fail(display = "no uploader plugin is installed")]
    NoUploaderConfigured,

    #[fail(display = "no batch with id {:?} is running", id)]
    BatchNotFound { id: String },

    #[fail(display = "preprocessor {:?} failed: {}", plugin_id, message)]
    PreprocessorFailed { plugin_id: String, message: String },

    #[fail(display = "postprocessor {:?} failed: {}", plugin_id, message)]
    PostprocessorFailed { plugin_id: String, message: String },

    #[fail(display = "uploader {:?} failed: {}", plugin_id, message)]
    UploaderFailed { plugin_id: String, message: String },

    #[fail(display = "persisting batch {:?} failed: {}", id, message)]
    PersistFailed { id: String, message: String },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error::from(Context::new(kind))
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(ctx: Context<ErrorKind>) -> Error {
        Error { ctx }
    }
}
