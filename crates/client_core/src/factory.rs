//! Construction of controllers for UI-owned lifecycles.

use std::{fmt, str::FromStr, sync::Arc};

use storage::ForageableStore;
use tokio::runtime::Handle;

use crate::{error::ControllerError, ForageableController};

/// Closed set of controllers this factory can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerKind {
    Forageable,
}

impl ControllerKind {
    pub const ALL: [ControllerKind; 1] = [ControllerKind::Forageable];

    pub fn as_str(self) -> &'static str {
        match self {
            ControllerKind::Forageable => "forageable",
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControllerKind {
    type Err = ControllerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        ControllerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| ControllerError::UnsupportedRequestKind(value.to_string()))
    }
}

/// Builds controllers that share one store handle and one runtime.
#[derive(Clone)]
pub struct ControllerFactory {
    store: Arc<dyn ForageableStore>,
    runtime: Handle,
}

impl ControllerFactory {
    pub fn new(store: Arc<dyn ForageableStore>, runtime: Handle) -> Self {
        Self { store, runtime }
    }

    /// Builds the controller named by `kind`.
    ///
    /// # Errors
    /// - `ControllerError::UnsupportedRequestKind` when `kind` is not a known controller.
    pub fn create(&self, kind: &str) -> Result<ForageableController, ControllerError> {
        let kind = kind.parse::<ControllerKind>()?;
        Ok(self.create_kind(kind))
    }

    pub fn create_kind(&self, kind: ControllerKind) -> ForageableController {
        match kind {
            ControllerKind::Forageable => {
                ForageableController::new(Arc::clone(&self.store), self.runtime.clone())
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/factory_tests.rs"]
mod tests;
