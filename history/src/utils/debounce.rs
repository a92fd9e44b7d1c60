//! Per-key debouncing of bursty events.
//!
//! Editors rarely write a file in one system call: a single save can show up
//! as a create, several data writes and a rename. [`Debouncer`] holds the
//! latest value for each key and releases it only after the key has been
//! quiet for the configured window, so one save becomes one event.
//!
//! A background task owns the pending map. It sleeps until the earliest
//! deadline, emits every key whose deadline has passed and goes back to
//! waiting. When the input side is dropped, whatever is still pending is
//! discarded.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//! use local_history::utils::debounce::Debouncer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (tx, mut rx) = mpsc::channel(16);
//!     let debouncer = Debouncer::new(Duration::from_millis(250), tx);
//!
//!     let path = PathBuf::from("/proj/src/a.ts");
//!     debouncer.push(path.clone(), "create");
//!     debouncer.push(path.clone(), "write");
//!
//!     // One event, carrying the last value.
//!     assert_eq!(rx.recv().await, Some((path, "write")));
//! }
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Capacity of the input queue between producers and the debounce task.
const INPUT_CAPACITY: usize = 1024;

/// Error type for debouncer operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DebouncerError {
    /// The debounce task has stopped.
    #[error("debouncer channel closed")]
    ChannelClosed,
}

/// Coalesces events by key, emitting the last value after a quiet window.
#[derive(Debug)]
pub struct Debouncer<K, V> {
    input_tx: mpsc::Sender<(K, V)>,
    window: Duration,
    task: JoinHandle<()>,
}

impl<K, V> Debouncer<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + 'static,
    V: Send + 'static,
{
    /// Starts a debouncer emitting on `output_tx` after `window` of quiet.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(window: Duration, output_tx: mpsc::Sender<(K, V)>) -> Self {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
        let task = tokio::spawn(run(window, input_rx, output_tx));
        Self {
            input_tx,
            window,
            task,
        }
    }

    /// Returns the quiet window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Queues an event without waiting. Safe to call from non-async code such
    /// as a file watcher callback.
    ///
    /// Returns false if the queue is full or the task has stopped.
    pub fn push(&self, key: K, value: V) -> bool {
        match self.input_tx.try_send((key, value)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full((key, _))) => {
                warn!(key = ?key, "Debounce queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queues an event, waiting for queue capacity.
    ///
    /// # Errors
    ///
    /// Returns [`DebouncerError::ChannelClosed`] if the task has stopped.
    pub async fn send(&self, key: K, value: V) -> Result<(), DebouncerError> {
        self.input_tx
            .send((key, value))
            .await
            .map_err(|_| DebouncerError::ChannelClosed)
    }

    /// Returns a cloneable handle for queueing events from other places.
    #[must_use]
    pub fn sender(&self) -> DebounceSender<K, V> {
        DebounceSender {
            input_tx: self.input_tx.clone(),
        }
    }
}

impl<K, V> Drop for Debouncer<K, V> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A cloneable, non-owning producer side of a [`Debouncer`].
#[derive(Debug)]
pub struct DebounceSender<K, V> {
    input_tx: mpsc::Sender<(K, V)>,
}

impl<K, V> Clone for DebounceSender<K, V> {
    fn clone(&self) -> Self {
        Self {
            input_tx: self.input_tx.clone(),
        }
    }
}

impl<K: Debug, V> DebounceSender<K, V> {
    /// Queues an event without waiting. Returns false if it was dropped.
    pub fn push(&self, key: K, value: V) -> bool {
        match self.input_tx.try_send((key, value)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full((key, _))) => {
                warn!(key = ?key, "Debounce queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

async fn run<K, V>(window: Duration, mut input_rx: mpsc::Receiver<(K, V)>, output_tx: mpsc::Sender<(K, V)>)
where
    K: Clone + Eq + Hash + Debug,
{
    let mut pending: HashMap<K, (V, Instant)> = HashMap::new();
    debug!(window_ms = window.as_millis(), "Debouncer started");

    loop {
        let next_deadline = pending.values().map(|(_, deadline)| *deadline).min();

        tokio::select! {
            received = input_rx.recv() => {
                let Some((key, value)) = received else {
                    if !pending.is_empty() {
                        debug!(dropped = pending.len(), "Debouncer closed with pending events");
                    }
                    break;
                };
                trace!(key = ?key, "Event queued");
                pending.insert(key, (value, Instant::now() + window));
            }
            () = sleep_until(next_deadline) => {
                let now = Instant::now();
                let due: Vec<K> = pending
                    .iter()
                    .filter(|(_, (_, deadline))| *deadline <= now)
                    .map(|(key, _)| key.clone())
                    .collect();

                for key in due {
                    let Some((value, _)) = pending.remove(&key) else {
                        continue;
                    };
                    trace!(key = ?key, "Event released");
                    if output_tx.send((key, value)).await.is_err() {
                        debug!("Debouncer output closed");
                        return;
                    }
                }
            }
        }
    }
}

/// Sleeps until `deadline`, or forever when nothing is pending.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    fn debouncer<V: Send + 'static>(
        window_ms: u64,
    ) -> (Debouncer<String, V>, mpsc::Receiver<(String, V)>) {
        let (tx, rx) = mpsc::channel(16);
        (Debouncer::new(Duration::from_millis(window_ms), tx), rx)
    }

    #[tokio::test]
    async fn emits_after_window() {
        let (debouncer, mut rx) = debouncer::<i32>(30);

        assert!(debouncer.push("a".to_string(), 1));

        let event = timeout(Duration::from_millis(500), rx.recv()).await.unwrap();
        assert_eq!(event, Some(("a".to_string(), 1)));
    }

    #[tokio::test]
    async fn burst_is_coalesced_to_last_value() {
        let (debouncer, mut rx) = debouncer::<i32>(50);

        for value in 1..=5 {
            debouncer.send("a".to_string(), value).await.unwrap();
        }

        let event = timeout(Duration::from_millis(500), rx.recv()).await.unwrap();
        assert_eq!(event, Some(("a".to_string(), 5)));

        let more = timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(more.is_err(), "burst should produce one event");
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let (debouncer, mut rx) = debouncer::<i32>(30);

        debouncer.push("a".to_string(), 1);
        debouncer.push("b".to_string(), 2);

        let mut keys = Vec::new();
        for _ in 0..2 {
            let (key, _) = timeout(Duration::from_millis(500), rx.recv())
                .await
                .unwrap()
                .unwrap();
            keys.push(key);
        }
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn new_event_restarts_window() {
        let (debouncer, mut rx) = debouncer::<i32>(100);

        debouncer.push("a".to_string(), 1);
        sleep(Duration::from_millis(60)).await;
        debouncer.push("a".to_string(), 2);

        // The first deadline has passed but the key was refreshed.
        let early = timeout(Duration::from_millis(60), rx.recv()).await;
        assert!(early.is_err());

        let event = timeout(Duration::from_millis(500), rx.recv()).await.unwrap();
        assert_eq!(event, Some(("a".to_string(), 2)));
    }

    #[tokio::test]
    async fn sender_handle_feeds_same_task() {
        let (debouncer, mut rx) = debouncer::<&'static str>(30);
        let sender = debouncer.sender();

        assert!(sender.clone().push("a".to_string(), "from handle"));

        let event = timeout(Duration::from_millis(500), rx.recv()).await.unwrap();
        assert_eq!(event, Some(("a".to_string(), "from handle")));
    }

    #[tokio::test]
    async fn dropping_debouncer_discards_pending() {
        let (debouncer, mut rx) = debouncer::<i32>(50);

        debouncer.push("a".to_string(), 1);
        drop(debouncer);

        let event = timeout(Duration::from_millis(200), rx.recv()).await.unwrap();
        assert_eq!(event, None);
    }
}
