//! Companion-layer errors (spec §4.K).

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

    pub fn not_configured() -> Error {
        ErrorKind::NotConfigured.into()
    }

    pub fn request_failed<S: Into<String>>(message: S) -> Error {
        ErrorKind::RequestFailed {
            message: message.into(),
        }
        .into()
    }

    pub fn request_rejected(status: u16, body: String) -> Error {
        ErrorKind::RequestRejected { status, body }.into()
    }

    pub fn unauthorized() -> Error {
        ErrorKind::Unauthorized.into()
    }

    pub fn storage_failed<S: Into<String>>(message: S) -> Error {
        ErrorKind::StorageFailed {
            message: message.into(),
        }
        .into()
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
    #[fail(display = "no companion url is configured")]
    NotConfigured,

    #[fail(display = "companion request failed: {}", message)]
    RequestFailed { message: String },

    #[fail(display = "companion rejected the request with status {}: {}", status, body)]
    RequestRejected { status: u16, body: String },

    #[fail(display = "companion rejected the request: not authorized")]
    Unauthorized,

    #[fail(display = "could not persist companion token: {}", message)]
    StorageFailed { message: String },
}

impl ErrorKind {
    /// Mirrors the `isAuthError` tag surfaced to callers (spec §7.3): a 401
    /// from the companion is the one case the kernel should treat as
    /// "re-authenticate", not "retry".
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ErrorKind::Unauthorized)
    }
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
