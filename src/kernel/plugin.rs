//! Installable plugin kinds (spec §4.G, REDESIGN FLAGS "dynamic plugin
//! dispatch -> typed variants"). A compile-time tagged enum replaces the
//! stringly-typed `type` registry; trait objects are used only at the
//! hook-closure level within each variant, matching what each kind of
//! plugin actually needs to do.
//!
//! File acquisition (drag-drop, pickers, remote-provider browsing) is an
//! external collaborator that calls `Kernel::add_file` directly; it has no
//! installable hook surface here (spec's Non-goals: no concrete DOM/event
//! adapter).

use async_trait::async_trait;

use crate::events::EventBus;
use crate::store::Store;
use crate::types::{FileId, SessionState};

/// Runs before a batch is handed to an uploader (spec §4.H, `preProcessors`).
#[async_trait]
pub trait Preprocessor: Send + Sync {
    fn id(&self) -> &str;
    async fn process(&self, file_ids: &[FileId], store: &Store) -> crate::Result<()>;

    /// Runs once, synchronously with `Kernel::use_plugin`, before the plugin
    /// ever processes a batch (spec §4.G, plugin lifecycle hooks). The
    /// default is a no-op.
    async fn install(&self, _store: &Store) -> crate::Result<()> {
        Ok(())
    }

    /// Runs once, synchronously with `Kernel::remove_plugin` (spec §4.G).
    async fn uninstall(&self, _store: &Store) -> crate::Result<()> {
        Ok(())
    }
}

/// Runs after a batch's uploader step completes (spec §4.H, `postProcessors`).
#[async_trait]
pub trait Postprocessor: Send + Sync {
    fn id(&self) -> &str;
    async fn process(&self, file_ids: &[FileId], store: &Store) -> crate::Result<()>;

    async fn install(&self, _store: &Store) -> crate::Result<()> {
        Ok(())
    }

    async fn uninstall(&self, _store: &Store) -> crate::Result<()> {
        Ok(())
    }
}

/// Drives the actual transfer for a batch (spec §4.H, `uploaders`). The
/// built-in HTTP-direct and remote/companion uploaders implement this.
#[async_trait]
pub trait Uploader: Send + Sync {
    fn id(&self) -> &str;
    async fn upload(
        &self,
        file_ids: &[FileId],
        store: &Store,
        events: &EventBus,
    ) -> crate::Result<()>;

    /// An uploader that bundles every file into one request forces
    /// `capabilities.individualCancellation` false at install and restores it
    /// at uninstall (spec §3 invariant 6, §4.I). Uploaders that never bundle
    /// leave capabilities untouched by default.
    async fn install(&self, _store: &Store) -> crate::Result<()> {
        Ok(())
    }

    async fn uninstall(&self, _store: &Store) -> crate::Result<()> {
        Ok(())
    }
}

/// A mounted render target (spec §4.G, `mount`). Called with the latest
/// state snapshot after the render debounce fires.
pub trait UiPlugin: Send {
    fn id(&self) -> &str;
    fn render(&mut self, state: &SessionState);
}

/// The four installable kinds (spec §9 REDESIGN FLAGS). Ordered the way
/// `Kernel::iterate_plugins` walks them: preprocessors, then uploaders, then
/// postprocessors, then UI targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PluginKind {
    Preprocessor,
    Uploader,
    Postprocessor,
    Ui,
}

pub const PLUGIN_KINDS: [PluginKind; 4] = [
    PluginKind::Preprocessor,
    PluginKind::Uploader,
    PluginKind::Postprocessor,
    PluginKind::Ui,
];

/// One installed plugin, tagged by kind (spec §9 REDESIGN FLAGS).
pub enum Plugin {
    Preprocessor(Box<dyn Preprocessor>),
    Uploader(Box<dyn Uploader>),
    Postprocessor(Box<dyn Postprocessor>),
    Ui(Box<dyn UiPlugin>),
}

impl Plugin {
    pub fn id(&self) -> &str {
        match self {
            Plugin::Preprocessor(p) => p.id(),
            Plugin::Uploader(p) => p.id(),
            Plugin::Postprocessor(p) => p.id(),
            Plugin::Ui(p) => p.id(),
        }
    }

    pub fn kind(&self) -> PluginKind {
        match self {
            Plugin::Preprocessor(_) => PluginKind::Preprocessor,
            Plugin::Uploader(_) => PluginKind::Uploader,
            Plugin::Postprocessor(_) => PluginKind::Postprocessor,
            Plugin::Ui(_) => PluginKind::Ui,
        }
    }

    /// Dispatches to the installed plugin's `install` hook; a no-op for UI
    /// targets, which have no lifecycle hooks of their own.
    pub async fn install(&self, store: &Store) -> crate::Result<()> {
        match self {
            Plugin::Preprocessor(p) => p.install(store).await,
            Plugin::Uploader(p) => p.install(store).await,
            Plugin::Postprocessor(p) => p.install(store).await,
            Plugin::Ui(_) => Ok(()),
        }
    }

    pub async fn uninstall(&self, store: &Store) -> crate::Result<()> {
        match self {
            Plugin::Preprocessor(p) => p.uninstall(store).await,
            Plugin::Uploader(p) => p.uninstall(store).await,
            Plugin::Postprocessor(p) => p.uninstall(store).await,
            Plugin::Ui(_) => Ok(()),
        }
    }
}
