//! Top-level error type for the engine.
//!
//! Every fallible module owns a local `Error`/`ErrorKind` pair (see
//! `restrictions::Error`, `pipeline::Error`, `uploader::Error`,
//! `companion::Error`, `database::Error`, `config::Error`). This module
//! aggregates them so that callers working against the `Kernel` only need to
//! match on one `ErrorKind`.

use std::{fmt, result};

use failure::{Backtrace, Context, Fail};
use log::info;

use crate::{companion, config, database, pipeline, restrictions, uploader};

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    ctx: Context<ErrorKind>,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.ctx.get_context()
    }

    /// Restriction failures are never silent: the kernel always logs the
    /// rejection at `info!` before re-throwing it to the caller.
    pub fn log_if_restriction(&self) {
        if self.kind().is_restriction() {
            info!("restriction-failed: {}", self.kind());
        }
    }

    fn _render<T: ToString>(&self, context: Option<T>) -> i32 {
        let kind = self.kind();
        match context {
            Some(ctx) => eprintln!("{}: {}", ctx.to_string(), kind),
            None => eprintln!("{}", kind),
        }
        info!("ERROR: {}", kind);
        1
    }

    /// Renders a message to stderr for a CLI-style caller and returns the
    /// process exit code that should be used.
    pub fn render(&self) -> i32 {
        self._render(None as Option<String>)
    }

    pub fn render_with_context<T: ToString>(&self, context: T) -> i32 {
        self._render(Some(context))
    }

    pub fn missing_asset_dir() -> Error {
        ErrorKind::MissingAssetDir.into()
    }

    pub fn plugin_already_registered<S: Into<String>>(id: S) -> Error {
        ErrorKind::PluginAlreadyRegistered { id: id.into() }.into()
    }

    pub fn plugin_missing_id() -> Error {
        ErrorKind::PluginMissingId.into()
    }

    pub fn invalid_mount_target<S: Into<String>>(reason: S) -> Error {
        ErrorKind::InvalidMountTarget {
            reason: reason.into(),
        }
        .into()
    }

    pub fn file_not_found<S: Into<String>>(id: S) -> Error {
        ErrorKind::FileNotFound { id: id.into() }.into()
    }

    pub fn batch_not_found<S: Into<String>>(id: S) -> Error {
        ErrorKind::BatchNotFound { id: id.into() }.into()
    }

    pub fn upload_cancelled() -> Error {
        ErrorKind::UploadCancelled.into()
    }

    pub fn upload_not_allowed() -> Error {
        ErrorKind::UploadNotAllowed.into()
    }

    pub fn file_rejected<S: Into<String>>(reason: S) -> Error {
        ErrorKind::FileRejected { reason: reason.into() }.into()
    }

    pub fn upload_rejected<S: Into<String>>(reason: S) -> Error {
        ErrorKind::UploadRejected { reason: reason.into() }.into()
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
    #[fail(display = "could not determine the asset home directory")]
    MissingAssetDir,

    #[fail(display = "a plugin with id {:?} is already registered", id)]
    PluginAlreadyRegistered { id: String },

    #[fail(display = "a plugin must declare a non-empty id")]
    PluginMissingId,

    #[fail(display = "invalid mount target: {}", reason)]
    InvalidMountTarget { reason: String },

    #[fail(display = "no file with id {:?} exists in this session", id)]
    FileNotFound { id: String },

    #[fail(display = "no batch with id {:?} exists in this session", id)]
    BatchNotFound { id: String },

    #[fail(display = "upload cancelled")]
    UploadCancelled,

    #[fail(display = "a new upload cannot start while another is in progress")]
    UploadNotAllowed,

    #[fail(display = "file rejected: {}", reason)]
    FileRejected { reason: String },

    #[fail(display = "upload rejected: {}", reason)]
    UploadRejected { reason: String },

    #[fail(display = "{}", kind)]
    Restriction { kind: restrictions::ErrorKind },

    #[fail(display = "{}", kind)]
    Pipeline { kind: pipeline::ErrorKind },

    #[fail(display = "{}", kind)]
    Uploader { kind: uploader::ErrorKind },

    #[fail(display = "{}", kind)]
    Companion { kind: companion::ErrorKind },

    #[fail(display = "{}", kind)]
    Database { kind: database::ErrorKind },

    #[fail(display = "{}", kind)]
    Config { kind: config::ErrorKind },
}

impl ErrorKind {
    /// Mirrors the `isRestriction` tag on admission errors (spec §7.1).
    pub fn is_restriction(&self) -> bool {
        matches!(self, ErrorKind::Restriction { .. })
    }

    /// Mirrors the `isAuthError` tag on companion auth failures (spec §7.3).
    pub fn is_auth_error(&self) -> bool {
        match self {
            ErrorKind::Companion { kind } => kind.is_auth_error(),
            _ => false,
        }
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

macro_rules! from_child_error {
    ($child_err:ty, $child_kind:ty, $variant:ident) => {
        impl From<$child_kind> for Error {
            fn from(kind: $child_kind) -> Error {
                Error::from(Context::new(ErrorKind::$variant { kind }))
            }
        }
        impl From<$child_err> for Error {
            fn from(error: $child_err) -> Error {
                error.kind().clone().into()
            }
        }
    };
}

from_child_error!(restrictions::Error, restrictions::ErrorKind, Restriction);
from_child_error!(pipeline::Error, pipeline::ErrorKind, Pipeline);
from_child_error!(uploader::Error, uploader::ErrorKind, Uploader);
from_child_error!(companion::Error, companion::ErrorKind, Companion);
from_child_error!(database::Error, database::ErrorKind, Database);
from_child_error!(config::Error, config::ErrorKind, Config);
