//! Ctrl+C handling.
//!
//! An interrupt only sets a shared flag. The walker stops yielding and the
//! scan loop stops taking new files once it is set; the pending registry
//! batch is still committed before the process exits with
//! [`crate::error::ExitCode::Interrupted`].
//!
//! ```rust,no_run
//! use fileregistry::signal::install_handler;
//!
//! let handler = install_handler().expect("signal handler");
//! let flag = handler.get_flag();
//! // hand `flag` to the walker and the scan orchestrator
//! # let _ = flag;
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Shared shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandler {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandler {
    /// Create a handler with no shutdown requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an interrupt arrived or [`Self::request_shutdown`] was called.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Set the flag by hand.
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// A clone of the flag for workers.
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Clear the flag.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Error installing the handler.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// `ctrlc` refused the handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install the process-wide Ctrl+C handler, or reuse the installed one.
///
/// Reuse resets the flag, so in-process callers that run several commands
/// (tests, mostly) each start clean.
///
/// # Errors
///
/// Returns [`SignalError`] only if `ctrlc` fails for a reason other than a
/// handler already being present.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let flag = handler.get_flag();

    let installed = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr, "\nInterrupted. Committing pending registry writes...");
        let _ = stderr.flush();
        log::info!("Shutdown signal received");
    });

    match installed {
        Ok(()) => {
            let _ = GLOBAL_HANDLER.set(handler.clone());
            Ok(handler)
        }
        Err(ctrlc::Error::MultipleHandlers) => {
            log::debug!("Signal handler already registered; using an unregistered flag");
            Ok(GLOBAL_HANDLER.get_or_init(|| handler).clone())
        }
        Err(e) => Err(e.into()),
    }
}
