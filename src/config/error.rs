//! Config-specific errors.

use std::{fmt, io, result};

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

    pub fn invalid_config<S: Into<String>>(message: S) -> Error {
        ErrorKind::InvalidConfig {
            message: message.into(),
        }
        .into()
    }

    pub fn config_file_not_found<S: Into<String>>(message: S) -> Error {
        ErrorKind::ConfigFileNotFound {
            message: message.into(),
        }
        .into()
    }

    pub fn missing_config_value<S: Into<String>>(key: S) -> Error {
        ErrorKind::MissingConfigValue { key: key.into() }.into()
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
    #[fail(display = "invalid configuration: {}", message)]
    InvalidConfig { message: String },

    #[fail(display = "config file not found: {}", message)]
    ConfigFileNotFound { message: String },

    #[fail(display = "ini parse error: {}", message)]
    IniParseError { message: String },

    #[fail(display = "io error: {}", error)]
    IoError { error: String },

    #[fail(display = "configuration value \"{}\" not found", key)]
    MissingConfigValue { key: String },
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

impl From<ini::ini::ParseError> for Error {
    fn from(error: ini::ini::ParseError) -> Error {
        Error::from(Context::new(ErrorKind::IniParseError {
            message: error.to_string(),
        }))
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Error {
        Error::from(Context::new(ErrorKind::IoError {
            error: error.to_string(),
        }))
    }
}
