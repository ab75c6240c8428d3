//! Run-enable input.
//!
//! Both loops check [`RunSwitch::is_enabled`] once per iteration. The switch
//! combines an optional digital input (a GPIO `value` file, active low) with a
//! software stop flag used for shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared run-enable signal.
#[derive(Debug, Clone)]
pub struct RunSwitch {
    stopped: Arc<AtomicBool>,
    pin: Option<PathBuf>,
}

impl Default for RunSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSwitch {
    /// Creates a switch with no input pin; enabled until [`Self::stop`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            pin: None,
        }
    }

    /// Creates a switch gated by a GPIO value file.
    #[must_use]
    pub fn with_pin(path: impl Into<PathBuf>) -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            pin: Some(path.into()),
        }
    }

    /// Returns true while operation is enabled.
    ///
    /// The pin is asserted when it reads `0` (pulled low). An unreadable pin
    /// counts as deasserted.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        self.pin.as_deref().is_none_or(pin_asserted)
    }

    /// Requests both loops to stop at their next check.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

fn pin_asserted(path: &Path) -> bool {
    match std::fs::read_to_string(path) {
        Ok(value) => value.trim() == "0",
        Err(e) => {
            tracing::warn!("cannot read run-enable pin {}: {}", path.display(), e);
            false
        }
    }
}
