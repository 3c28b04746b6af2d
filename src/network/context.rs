//! I/O execution context
//!
//! A tokio runtime plus the dedicated background thread that drives it.
//! Every socket owned by a server or client lives on exactly one context.

use std::future::Future;
use std::thread::JoinHandle;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;

use crate::config::NetConfig;
use crate::error::{NetError, Result};

/// Reactor and the thread that runs it
pub struct IoContext {
    handle: Handle,
    shutdown: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl IoContext {
    /// Build the runtime and start driving it in the background
    ///
    /// One I/O thread uses a current-thread runtime driven entirely by the
    /// background thread. More than one uses a multi-thread runtime with that
    /// many workers.
    pub fn start(config: &NetConfig) -> Result<Self> {
        let runtime = build_runtime(config)?;
        let handle = runtime.handle().clone();
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || drive(runtime, token))
            .map_err(|e| NetError::Runtime(format!("Failed to spawn I/O thread: {}", e)))?;

        tracing::debug!("I/O context started ({} thread(s))", config.io_threads);

        Ok(Self {
            handle,
            shutdown,
            thread: Some(thread),
        })
    }

    /// Runtime handle, for entering the context or spawning onto it
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Token cancelled when the context stops
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Schedule a future on the context
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop the runtime and join the background thread
    ///
    /// Safe to call more than once. All tasks are dropped, which closes every
    /// socket they own.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        self.shutdown.cancel();
        if thread.join().is_err() {
            tracing::error!("I/O thread panicked");
        }
        tracing::debug!("I/O context stopped");
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_runtime(config: &NetConfig) -> Result<Runtime> {
    let mut builder = if config.io_threads > 1 {
        let mut builder = Builder::new_multi_thread();
        builder
            .worker_threads(config.io_threads)
            .thread_name(config.thread_name.clone());
        builder
    } else {
        Builder::new_current_thread()
    };

    builder
        .enable_all()
        .build()
        .map_err(|e| NetError::Runtime(format!("Failed to build runtime: {}", e)))
}

/// Body of the background thread
fn drive(runtime: Runtime, shutdown: CancellationToken) {
    runtime.block_on(shutdown.cancelled());
    // Dropping the runtime cancels every remaining task.
    drop(runtime);
}
