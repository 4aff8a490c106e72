//! Asynchronous load states
//!
//! Loader threads fill an [`AssetSlot`]; the render thread polls it once per frame
//! and moves the result into its own [`LoadState`] after uploading to the GPU.

use crate::error::AssetError;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Lifecycle of one loadable resource
#[derive(Debug)]
pub enum LoadState<T> {
    Unloaded,
    Loading,
    Ready(T),
    Failed(AssetError),
}

impl<T> Default for LoadState<T> {
    fn default() -> Self {
        LoadState::Unloaded
    }
}

impl<T> LoadState<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, LoadState::Ready(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, LoadState::Loading)
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            LoadState::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn ready_mut(&mut self) -> Option<&mut T> {
        match self {
            LoadState::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&AssetError> {
        match self {
            LoadState::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LoadState::Unloaded => "unloaded",
            LoadState::Loading => "loading",
            LoadState::Ready(_) => "ready",
            LoadState::Failed(_) => "failed",
        }
    }
}

/// Shared slot written by a loader thread
pub struct AssetSlot<T> {
    state: Arc<Mutex<LoadState<T>>>,
}

impl<T> Clone for AssetSlot<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for AssetSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AssetSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LoadState::Unloaded)),
        }
    }

    /// Slot that already holds a decoded value
    pub fn from_value(value: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(LoadState::Ready(value))),
        }
    }

    pub fn mark_loading(&self) {
        *self.state.lock() = LoadState::Loading;
    }

    pub fn complete(&self, result: Result<T, AssetError>) {
        *self.state.lock() = match result {
            Ok(value) => LoadState::Ready(value),
            Err(err) => LoadState::Failed(err),
        };
    }

    pub fn state_label(&self) -> &'static str {
        self.state.lock().label()
    }

    /// Move a finished result out, leaving the slot unloaded.
    /// Returns `None` while the load is still running.
    pub fn take_finished(&self) -> Option<Result<T, AssetError>> {
        let mut state = self.state.lock();
        match std::mem::take(&mut *state) {
            LoadState::Ready(value) => Some(Ok(value)),
            LoadState::Failed(err) => Some(Err(err)),
            other => {
                *state = other;
                None
            }
        }
    }
}

/// Run `load` on a named worker thread and return the slot it completes
pub fn spawn_load<T, F>(name: &str, load: F) -> AssetSlot<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AssetError> + Send + 'static,
{
    let slot = AssetSlot::new();
    slot.mark_loading();

    let worker = slot.clone();
    let label = name.to_string();
    let spawned = std::thread::Builder::new()
        .name(format!("load:{}", name))
        .spawn(move || {
            // A panicking decoder must still leave the slot finished
            let result = panic::catch_unwind(AssertUnwindSafe(load)).unwrap_or_else(|_| {
                log::error!("Loader {} panicked", label);
                Err(AssetError::LoaderPanicked(label))
            });
            worker.complete(result);
        });

    if let Err(err) = spawned {
        slot.complete(Err(AssetError::Io(err)));
    }
    slot
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait<T>(slot: &AssetSlot<T>) -> Result<T, AssetError> {
        let start = Instant::now();
        loop {
            if let Some(result) = slot.take_finished() {
                return result;
            }
            assert!(start.elapsed() < Duration::from_secs(5), "load did not finish");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_spawn_load_ready() {
        let slot = spawn_load("answer", || Ok(42u32));
        assert_eq!(wait(&slot).unwrap(), 42);
        assert_eq!(slot.state_label(), "unloaded");
    }

    #[test]
    fn test_spawn_load_failed() {
        let slot: AssetSlot<u32> = spawn_load("broken", || Err(AssetError::Truncated));
        assert!(matches!(wait(&slot), Err(AssetError::Truncated)));
    }

    #[test]
    fn test_spawn_load_panic_fails_slot() {
        let slot: AssetSlot<u32> = spawn_load("exploding", || panic!("decoder bug"));
        assert!(matches!(wait(&slot), Err(AssetError::LoaderPanicked(name)) if name == "exploding"));
    }

    #[test]
    fn test_loading_is_not_taken() {
        let slot: AssetSlot<u32> = AssetSlot::new();
        slot.mark_loading();
        assert!(slot.take_finished().is_none());
        assert_eq!(slot.state_label(), "loading");
    }
}
