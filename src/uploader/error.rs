//! Uploader-layer errors (spec §4.I/J).

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

    pub fn request_failed<S: Into<String>>(message: S) -> Error {
        ErrorKind::RequestFailed {
            message: message.into(),
        }
        .into()
    }

    pub fn server_rejected(status: u16, body: String) -> Error {
        ErrorKind::ServerRejected { status, body }.into()
    }

    pub fn stalled(elapsed_secs: u64) -> Error {
        ErrorKind::Stalled { elapsed_secs }.into()
    }

    pub fn socket_error<S: Into<String>>(message: S) -> Error {
        ErrorKind::SocketError {
            message: message.into(),
        }
        .into()
    }

    pub fn file_removed() -> Error {
        ErrorKind::FileRemoved.into()
    }

    pub fn upload_cancelled() -> Error {
        ErrorKind::UploadCancelled.into()
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
    #[fail(display = "upload request failed: {}", message)]
    RequestFailed { message: String },

    #[fail(display = "server rejected the upload with status {}: {}", status, body)]
    ServerRejected { status: u16, body: String },

    #[fail(display = "Upload stalled for {} seconds, aborting.", elapsed_secs)]
    Stalled { elapsed_secs: u64 },

    #[fail(display = "websocket error: {}", message)]
    SocketError { message: String },

    #[fail(display = "File removed")]
    FileRemoved,

    #[fail(display = "Upload cancelled")]
    UploadCancelled,
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

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Error {
        Error::from(Context::new(ErrorKind::RequestFailed {
            message: error.to_string(),
        }))
    }
}
