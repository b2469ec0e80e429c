//! Generation-tagged work queue behind the eventually-consistent wrappers.
//!
//! One worker thread per queue drains operations in order. A rebuild bumps
//! the generation and supersedes everything queued before it: the worker
//! discards operations tagged with an older generation instead of applying
//! work whose outcome the rebuild already covers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use log::{debug, trace};

pub(crate) struct Queued<T> {
    generation: u64,
    op: T,
}

pub(crate) struct EventualQueue<T> {
    sender: Option<Sender<Queued<T>>>,
    generation: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> EventualQueue<T> {
    pub fn start<F>(mut apply: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let generation = Arc::new(AtomicU64::new(0));
        let current = generation.clone();
        let (sender, receiver) = unbounded::<Queued<T>>();
        let worker = std::thread::Builder::new()
            .name("rivus-sync".into())
            .spawn(move || {
                for queued in receiver.iter() {
                    if queued.generation < current.load(Ordering::SeqCst) {
                        trace!(
                            "discarding operation from superseded generation {}",
                            queued.generation
                        );
                        continue;
                    }
                    apply(queued.op);
                }
                debug!("sync worker drained and exiting");
            })
            .expect("failed to spawn sync worker");
        Self {
            sender: Some(sender),
            generation,
            worker: Some(worker),
        }
    }

    /// Enqueues an incremental operation under the current generation.
    pub fn push(&self, op: T) {
        self.send(Queued {
            generation: self.generation.load(Ordering::SeqCst),
            op,
        });
    }

    /// Bumps the generation and enqueues `op` under it, cancelling all
    /// not-yet-applied older operations.
    pub fn push_superseding(&self, op: T) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("rebuild supersedes queued work up to generation {}", generation);
        self.send(Queued { generation, op });
    }

    fn send(&self, queued: Queued<T>) {
        self.sender
            .as_ref()
            .expect("queue already disposed")
            .send(queued)
            .expect("sync worker hung up");
    }
}

impl<T> Drop for EventualQueue<T> {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
