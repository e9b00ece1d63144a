//! Locations of the engine's on-disk assets: configuration, the durable
//! batch/session database, and any cached data.

use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// The home directory for configuration files, the durable database, and
/// cached data, relative to the user's home directory.
pub static CONVEYOR_HOME: &str = ".conveyor";

/// Gets the base directory used for on-disk assets such as configuration
/// files and the durable database.
pub fn home_dir() -> Result<PathBuf> {
    match dirs::home_dir() {
        Some(path) => {
            let mut assets = path;
            assets.push(CONVEYOR_HOME);
            Ok(assets)
        }
        None => Err(ErrorKind::MissingAssetDir.into()),
    }
}

/// Gets the location of the engine's configuration file.
/// By default, this file is located at `"${home_dir()}/config.ini"`.
pub fn config_file() -> Result<PathBuf> {
    home_dir().map(|dir| with_extension(dir, "config", "ini"))
}

/// Gets the location of the durable session/batch database.
/// By default, this file is located at `"${home_dir()}/conveyor.db"`.
pub fn database_file() -> Result<PathBuf> {
    home_dir().map(|dir| with_extension(dir, "conveyor", "db"))
}

/// Gets the cache data directory.
/// By default, this is located at `"${home_dir()}/cache"`.
pub fn cache_dir() -> Result<PathBuf> {
    home_dir().map(|dir| dir.join("cache"))
}

fn with_extension<P: AsRef<Path>>(dir: P, stem: &str, extension: &str) -> PathBuf {
    let mut file = dir.as_ref().join(stem);
    file.set_extension(extension);
    file
}
