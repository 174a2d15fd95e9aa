use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Runs blocking archive work off the calling task.
///
/// The runtime is injected by the caller; nothing here spawns threads of its
/// own or reaches for a global pool.
#[derive(Debug, Clone)]
pub struct Executor {
    handle: Handle,
}

impl Executor {
    /// Executor bound to the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::from_handle(Handle::current())
    }

    pub fn from_handle(handle: Handle) -> Self {
        Executor { handle }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run `f` on the runtime's blocking pool and wait for its result.
    ///
    /// A token that is already cancelled fails fast without submitting
    /// anything. The token is passed on so `f` can check it at its own
    /// checkpoints. A panic inside `f` is resumed on the awaiting task.
    pub async fn run<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let token = cancel.clone();
        match self.handle.spawn_blocking(move || f(token)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(Error::Failed(format!("blocking task did not complete: {e}"))),
        }
    }
}
