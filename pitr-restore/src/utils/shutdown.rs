//! Cooperative cancellation for SIGINT and SIGTERM.
//!
//! Signals are awaited on a small background runtime that flips an atomic
//! flag. Restore loops poll it once per file and abort with
//! [`RestoreError::Interrupted`]; nothing is rolled back.

use crate::utils::errors::{RestoreError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::warn;

/// Shared "interrupted" flag
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// A flag that only changes through [`Interrupt::trigger`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch for SIGINT/SIGTERM on a background thread; the first one sets
    /// the returned flag.
    pub fn install() -> anyhow::Result<Self> {
        let interrupt = Self::new();

        let runtime = tokio::runtime::Builder::new_current_thread().enable_io().build()?;
        // Register before returning so an early signal is not lost.
        let (mut sigint, mut sigterm) = {
            let _guard = runtime.enter();
            (signal(SignalKind::interrupt())?, signal(SignalKind::terminate())?)
        };

        let flag = interrupt.clone();
        std::thread::Builder::new()
            .name("signal-watch".to_string())
            .spawn(move || {
                runtime.block_on(async {
                    tokio::select! {
                        _ = sigint.recv() => {
                            warn!("Received SIGINT, stopping after the current file");
                        }
                        _ = sigterm.recv() => {
                            warn!("Received SIGTERM, stopping after the current file");
                        }
                    }
                });
                flag.trigger();
            })?;

        Ok(interrupt)
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fails with `Interrupted(during)` once the flag is set.
    pub fn check(&self, during: &'static str) -> Result<()> {
        if self.is_set() {
            return Err(RestoreError::Interrupted(during));
        }
        Ok(())
    }
}
