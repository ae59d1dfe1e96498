//! [`KeyBindingStore`]: lock-free holder for the active key binding.

use std::sync::Arc;

use arc_swap::ArcSwap;

use super::{BindingError, KeyBinding};

/// Shared holder for the active [`KeyBinding`].
///
/// Backed by [`ArcSwap`]: readers take a whole-value snapshot and never block,
/// the refresh task swaps in a complete replacement. A reader can never see a
/// key id from one binding paired with the version of another.
#[derive(Clone, Debug)]
pub struct KeyBindingStore {
    inner: Arc<ArcSwap<KeyBinding>>,
}

impl KeyBindingStore {
    pub fn new(initial: KeyBinding) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Snapshot of the current binding.
    pub fn current(&self) -> Arc<KeyBinding> {
        self.inner.load_full()
    }

    /// Atomically replace the binding.
    ///
    /// Returns the binding that was replaced.
    ///
    /// # Errors
    ///
    /// Returns a [`BindingError`] if `next` is not a valid binding; the stored
    /// value is left untouched.
    pub fn replace(&self, next: KeyBinding) -> Result<Arc<KeyBinding>, BindingError> {
        next.validate()?;
        Ok(self.inner.swap(Arc::new(next)))
    }
}
