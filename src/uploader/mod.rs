//! Built-in uploader plugins (spec §4.I/J): direct HTTP upload and
//! companion-proxied remote upload. Both implement `kernel::plugin::Uploader`
//! so the pipeline coordinator can drive either one interchangeably.

mod error;
pub mod http;
pub mod remote;

pub use self::error::{Error, ErrorKind, Result};
