//! Restriction-evaluator errors. Every variant here is, by construction,
//! a restriction failure once wrapped in the top-level `ErrorKind` (see
//! `crate::error::ErrorKind::is_restriction`).

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
    #[fail(
        display = "\"{}\" is {} bytes, which exceeds the {} byte limit",
        name, size, max_size
    )]
    FileTooLarge {
        name: String,
        size: u64,
        max_size: u64,
    },

    #[fail(display = "adding another file would exceed the total size limit of {} bytes", max_total)]
    TotalSizeExceeded { max_total: u64 },

    #[fail(display = "\"{}\" has type \"{}\", which is not an allowed file type", name, mime_type)]
    DisallowedFileType { name: String, mime_type: String },

    #[fail(display = "this session already has the maximum of {} files", max_count)]
    TooManyFiles { max_count: usize },

    #[fail(
        display = "at least {} files are required to start an upload, but only {} are present",
        min_count, actual
    )]
    NotEnoughFiles { min_count: usize, actual: usize },

    #[fail(display = "\"{}\" is missing the required meta field \"{}\"", name, field)]
    MissingRequiredMeta { name: String, field: String },
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
