//! Ordered release actions for staged resources
//!
//! Every resource the tool acquires (a directory, a mount) is paired with
//! the action that releases it. Releases are pushed only after the
//! acquisition succeeded and are unwound in reverse order. An unwind
//! attempts every release even when earlier ones fail, then reports the
//! failures once.

use crate::error::{ReleaseFailure, Result, TeardownFailure};
use tracing::{debug, error, info, warn};

type Release<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

struct Entry<'a> {
    label: String,
    release: Release<'a>,
}

/// Stack of pending release actions
///
/// Dropping a non-empty stack unwinds it, so resources are released on
/// early returns and panics as well as on the explicit path.
pub struct ResourceStack<'a> {
    entries: Vec<Entry<'a>>,
}

impl<'a> ResourceStack<'a> {
    /// Create an empty stack
    pub fn new() -> Self {
        ResourceStack {
            entries: Vec::new(),
        }
    }

    /// Run `action`; if it succeeds, register `release` for it
    ///
    /// A failed action leaves the stack untouched and its error is
    /// returned as is.
    pub fn acquire<T, A, R>(&mut self, label: impl Into<String>, action: A, release: R) -> Result<T>
    where
        A: FnOnce() -> Result<T>,
        R: FnOnce() -> Result<()> + 'a,
    {
        let label = label.into();
        let value = action()?;
        self.push(label, release);
        Ok(value)
    }

    /// Register the release of a resource that is already held
    pub fn push<R>(&mut self, label: impl Into<String>, release: R)
    where
        R: FnOnce() -> Result<()> + 'a,
    {
        let label = label.into();
        debug!("Registered release: {}", label);
        self.entries.push(Entry {
            label,
            release: Box::new(release),
        });
    }

    /// Number of pending releases
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is held
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels of pending releases, oldest first
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.label.as_str()).collect()
    }

    /// Release everything, newest first
    ///
    /// Every entry is attempted exactly once. Failures are collected and
    /// returned together after the last entry ran; they are not retried.
    pub fn unwind_all(&mut self) -> std::result::Result<(), TeardownFailure> {
        if self.entries.is_empty() {
            return Ok(());
        }

        info!("Releasing {} staged resource(s)", self.entries.len());

        let mut failure = TeardownFailure::default();
        while let Some(entry) = self.entries.pop() {
            debug!("Releasing: {}", entry.label);
            match (entry.release)() {
                Ok(()) => debug!("Released: {}", entry.label),
                Err(e) => {
                    warn!("Failed to release {}: {}", entry.label, e);
                    failure.failures.push(ReleaseFailure {
                        label: entry.label,
                        error: e,
                    });
                }
            }
        }

        if failure.failures.is_empty() {
            Ok(())
        } else {
            Err(failure)
        }
    }
}

impl Default for ResourceStack<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ResourceStack<'_> {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }

        warn!(
            "{} resource(s) still held on abnormal exit, releasing",
            self.entries.len()
        );
        if let Err(failure) = self.unwind_all() {
            error!("Teardown incomplete: {}", failure);
            for label in failure.labels() {
                error!("Needs manual cleanup: {}", label);
            }
        }
    }
}
