//! Bounded admission of accepted connections.
//!
//! Accepted items wait in a bounded queue until one of a fixed number of
//! worker slots is free. A slot is a semaphore permit; it is held for the
//! whole life of the handler task and only goes back to the pool once that
//! task finishes. A full queue makes [`AdmissionQueue::admit`] wait, which
//! pushes back on the accept loop instead of dropping anything.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("admission queue closed, dispatcher is no longer running")]
pub struct AdmissionClosed;

/// Creates the two halves of an admission controller with `workers` slots and
/// room for `queue_capacity` waiting items.
///
/// # Panics
///
/// Panics if `queue_capacity` is zero or `workers` exceeds the semaphore's
/// permit limit.
pub fn bounded<T>(workers: usize, queue_capacity: usize) -> (AdmissionQueue<T>, Dispatcher<T>) {
    let (sender, receiver) = mpsc::channel(queue_capacity);
    let running = Arc::new(AtomicUsize::new(0));

    let queue = AdmissionQueue {
        sender,
        running: Arc::clone(&running),
    };
    let dispatcher = Dispatcher {
        receiver,
        slots: Arc::new(Semaphore::new(workers)),
        running,
        workers,
    };
    (queue, dispatcher)
}

/// Producer side, fed by the accept loop.
#[derive(Debug)]
pub struct AdmissionQueue<T> {
    sender: mpsc::Sender<T>,
    running: Arc<AtomicUsize>,
}

impl<T> AdmissionQueue<T> {
    /// Queues `item`, waiting while the queue is full.
    pub async fn admit(&self, item: T) -> Result<(), AdmissionClosed> {
        self.sender.send(item).await.map_err(|_| AdmissionClosed)
    }

    /// Items waiting for a worker slot.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Worker slots currently running a handler.
    pub fn busy_slots(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }
}

/// Consumer side, pairing queued items with free worker slots.
#[derive(Debug)]
pub struct Dispatcher<T> {
    receiver: mpsc::Receiver<T>,
    slots: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
    workers: usize,
}

impl<T> Dispatcher<T> {
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs until every [`AdmissionQueue`] handle is dropped and everything
    /// already queued has been handed to a handler.
    ///
    /// Each turn first waits for a free slot, then for a queued item, then
    /// spawns `handler(item)` holding that slot. Once the queue is closed and
    /// empty, waits for every running handler to finish before returning.
    pub async fn run<H, F>(mut self, mut handler: H)
    where
        H: FnMut(T) -> F,
        F: Future<Output = ()> + Send + 'static,
    {
        loop {
            let Ok(permit) = Arc::clone(&self.slots).acquire_owned().await else {
                break;
            };
            let Some(item) = self.receiver.recv().await else {
                break;
            };
            self.running.fetch_add(1, Ordering::AcqRel);
            let slot = Slot {
                _permit: permit,
                running: Arc::clone(&self.running),
            };
            tokio::spawn(with_slot(handler(item), slot));
        }

        debug!(
            running = self.running.load(Ordering::Acquire),
            "admission queue drained, waiting for handlers"
        );
        // Holding every permit at once means no handler is left.
        if let Ok(all) = u32::try_from(self.workers) {
            let _ = self.slots.acquire_many(all).await;
        }
        debug!("dispatcher stopped");
    }
}

/// A claimed worker slot. Dropping it frees the slot, even if the handler
/// panicked.
struct Slot {
    _permit: OwnedSemaphorePermit,
    running: Arc<AtomicUsize>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Releases the slot back to the pool once `task` completes.
async fn with_slot<F>(task: F, slot: Slot)
where
    F: Future<Output = ()>,
{
    task.await;
    drop(slot);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        sync::{Notify, oneshot},
        time::{sleep, timeout},
    };

    use super::*;

    #[tokio::test]
    async fn never_exceeds_worker_slots() {
        let (queue, dispatcher) = bounded::<usize>(3, 2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        let dispatch = {
            let (active, peak, finished) =
                (Arc::clone(&active), Arc::clone(&peak), Arc::clone(&finished));
            tokio::spawn(dispatcher.run(move |_item| {
                let (active, peak, finished) =
                    (Arc::clone(&active), Arc::clone(&peak), Arc::clone(&finished));
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    finished.fetch_add(1, Ordering::SeqCst);
                }
            }))
        };

        for item in 0..10 {
            queue.admit(item).await.expect("dispatcher running");
        }

        timeout(Duration::from_secs(2), async {
            while finished.load(Ordering::SeqCst) < 10 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("all items handled");

        assert!(peak.load(Ordering::SeqCst) <= 3);
        timeout(Duration::from_secs(1), async {
            while queue.busy_slots() != 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("every slot returned");

        drop(queue);
        timeout(Duration::from_secs(1), dispatch)
            .await
            .expect("dispatcher stops once the queue closes")
            .expect("join");
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let (queue, dispatcher) = bounded::<&'static str>(1, 1);
        let release = Arc::new(Notify::new());
        let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn({
            let release = Arc::clone(&release);
            dispatcher.run(move |item| {
                let release = Arc::clone(&release);
                let started_tx = started_tx.clone();
                async move {
                    let _ = started_tx.send(item);
                    release.notified().await;
                }
            })
        });

        queue.admit("first").await.expect("admit first");
        assert_eq!(started_rx.recv().await, Some("first"));

        queue.admit("second").await.expect("second waits in the queue");
        assert_eq!(queue.queued(), 1);
        assert_eq!(queue.busy_slots(), 1);

        let third = timeout(Duration::from_millis(50), queue.admit("third")).await;
        assert!(third.is_err(), "admit should wait while the queue is full");

        release.notify_one();
        assert_eq!(started_rx.recv().await, Some("second"));
        timeout(Duration::from_secs(1), queue.admit("third"))
            .await
            .expect("queue drains once a slot frees up")
            .expect("dispatcher running");
    }

    #[tokio::test]
    async fn admit_fails_once_dispatcher_is_gone() {
        let (queue, dispatcher) = bounded::<u8>(1, 1);
        drop(dispatcher);

        assert_eq!(queue.admit(1).await, Err(AdmissionClosed));
    }

    #[tokio::test]
    async fn slot_is_held_until_handler_finishes() {
        let (queue, dispatcher) = bounded::<()>(2, 1);
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let mut done_rx = Some(done_rx);

        tokio::spawn(dispatcher.run(move |()| {
            let done_rx = done_rx.take();
            async move {
                if let Some(done_rx) = done_rx {
                    let _ = done_rx.await;
                }
            }
        }));

        queue.admit(()).await.expect("admit");
        timeout(Duration::from_secs(1), async {
            while queue.busy_slots() != 1 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handler picked up");

        done_tx.send(()).expect("handler waiting");
        timeout(Duration::from_secs(1), async {
            while queue.busy_slots() != 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("slot returned");
    }

    #[tokio::test]
    async fn closed_queue_is_drained_before_run_returns() {
        let (queue, dispatcher) = bounded::<u8>(1, 4);
        let release = Arc::new(Notify::new());
        let (served_tx, mut served_rx) = tokio::sync::mpsc::unbounded_channel();

        let dispatch = tokio::spawn({
            let release = Arc::clone(&release);
            dispatcher.run(move |item| {
                let release = Arc::clone(&release);
                let served_tx = served_tx.clone();
                async move {
                    release.notified().await;
                    let _ = served_tx.send(item);
                }
            })
        });

        for item in 1..=3 {
            queue.admit(item).await.expect("dispatcher running");
        }
        drop(queue);

        for expected in 1..=3 {
            release.notify_one();
            let served = timeout(Duration::from_secs(1), served_rx.recv())
                .await
                .expect("queued item handed to a handler");
            assert_eq!(served, Some(expected));
        }

        timeout(Duration::from_secs(1), dispatch)
            .await
            .expect("dispatcher stops after the last handler")
            .expect("join");
    }
}
