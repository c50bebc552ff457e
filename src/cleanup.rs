use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Staging paths that must not survive an interrupted install.
#[derive(Default)]
pub struct CleanupContext {
    #[cfg(test)]
    pub paths: Vec<PathBuf>,
    #[cfg(not(test))]
    paths: Vec<PathBuf>,
}

impl CleanupContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn remove(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    /// Remove every registered path, ignoring ones already gone.
    pub fn cleanup(&self) {
        for path in &self.paths {
            debug!("Cleaning up: {:?}", path);
            let result = if path.is_dir() {
                std::fs::remove_dir_all(path)
            } else {
                std::fs::remove_file(path)
            };
            match result {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    warn!("Failed to clean up {:?}: {}", path, e);
                }
                _ => {}
            }
        }
    }
}

pub type SharedCleanupContext = Arc<Mutex<CleanupContext>>;

pub fn new_shared() -> SharedCleanupContext {
    Arc::new(Mutex::new(CleanupContext::new()))
}

/// Lock the context even if a panicking thread poisoned it; the path list stays valid.
pub fn lock(ctx: &SharedCleanupContext) -> MutexGuard<'_, CleanupContext> {
    ctx.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps a path registered for cleanup until [`CleanupGuard::success`] is called.
pub struct CleanupGuard {
    ctx: SharedCleanupContext,
    path: PathBuf,
}

impl CleanupGuard {
    pub fn new(ctx: SharedCleanupContext, path: PathBuf) -> Self {
        lock(&ctx).add(path.clone());
        Self { ctx, path }
    }

    /// The path was published or removed by its owner; stop tracking it.
    pub fn success(self) {
        lock(&self.ctx).remove(&self.path);
    }
}

/// Run `fut` with a Ctrl-C handler that removes everything in `ctx` and exits with 130.
pub async fn with_interrupt_cleanup<F, T>(ctx: SharedCleanupContext, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let handler_ctx = Arc::clone(&ctx);
    let ctrl_c_handler = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cleaning up...");
            lock(&handler_ctx).cleanup();
            std::process::exit(130);
        }
    });

    let result = fut.await;
    ctrl_c_handler.abort();
    result
}
