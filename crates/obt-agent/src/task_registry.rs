//! Completion-watcher tasks owned by one engine instance.
//!
//! Every accepted request gets a task that waits for its completion. Shutting
//! the registry down aborts those tasks, which drops their receivers, so a
//! collaborator completing a request afterwards finds nobody listening.

use parking_lot::Mutex;
use std::future::Future;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct TaskRegistry {
    runtime: Handle,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRegistry {
    pub fn new(runtime: Handle) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            runtime,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a task that is dropped at its next await point once the registry shuts down.
    pub fn spawn_cancellable<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = self.runtime.spawn(async move {
            tokio::select! {
                _ = shutdown_rx.wait_for(|stopped| *stopped) => {}
                _ = fut => {}
            }
        });
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Number of tasks that have not finished yet
    pub fn active(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
