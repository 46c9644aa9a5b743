//! Document sources: opening, caching and single-flighting of the YAML and
//! JSON documents a rolodex discovers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::SystemTime;

use oas_tree::NodeId;
use parking_lot::Condvar;
use parking_lot::Mutex;

use crate::IndexError;
use crate::SpecIndex;

mod content;
mod local;
mod remote;

pub use content::*;
pub use local::*;
pub use remote::*;

/// The outcome of opening a document, shared with every waiter.
pub(crate) type OpenResult = Result<Arc<Document>, Arc<IndexError>>;

/// A document opened by a source.
#[derive(Debug)]
pub struct Document {
    /// The absolute canonical key of the document.
    absolute_key: String,
    /// The detected content type of the document.
    content_type: ContentType,
    /// The root node of the parsed document.
    root: NodeId,
    /// The number of lines in the document source.
    line_count: usize,
    /// The `Last-Modified` timestamp, for remote documents.
    last_modified: Option<SystemTime>,
    /// The index built for the document during the rolodex indexing phase.
    index: OnceLock<Arc<SpecIndex>>,
}

impl Document {
    /// Constructs a new document.
    pub(crate) fn new(
        absolute_key: impl Into<String>,
        content_type: ContentType,
        root: NodeId,
        line_count: usize,
        last_modified: Option<SystemTime>,
    ) -> Self {
        Self {
            absolute_key: absolute_key.into(),
            content_type,
            root,
            line_count,
            last_modified,
            index: OnceLock::new(),
        }
    }

    /// Gets the absolute canonical key of the document.
    pub fn absolute_key(&self) -> &str {
        &self.absolute_key
    }

    /// Gets the detected content type of the document.
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Gets the root node of the parsed document.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Gets the number of lines in the document source.
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    /// Gets the `Last-Modified` timestamp, for remote documents.
    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }

    /// Gets the index built for the document, if one exists yet.
    pub fn index(&self) -> Option<&Arc<SpecIndex>> {
        self.index.get()
    }

    /// Assigns the index built for the document.
    ///
    /// The first assignment wins.
    pub(crate) fn set_index(&self, index: Arc<SpecIndex>) {
        let _ = self.index.set(index);
    }
}

/// A per-key waiter used to single-flight concurrent opens.
struct Waiter {
    /// The outcome of the flight, once the leader completes.
    state: Mutex<Option<OpenResult>>,
    /// Signalled when the leader completes.
    cond: Condvar,
    /// The number of followers blocked on the flight.
    listeners: AtomicUsize,
}

impl Waiter {
    /// Constructs a new waiter with no outcome.
    fn new() -> Self {
        Self {
            state: Mutex::new(None),
            cond: Condvar::new(),
            listeners: AtomicUsize::new(0),
        }
    }
}

/// Single-flights opens by key.
///
/// The first caller for a key becomes the leader and runs the work; callers
/// arriving while the flight is in progress block on the waiter and receive
/// the leader's outcome when it broadcasts.
#[derive(Default)]
pub(crate) struct SingleFlight {
    /// In-progress flights by key.
    waiters: Mutex<HashMap<String, Arc<Waiter>>>,
}

impl std::fmt::Debug for SingleFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.waiters.lock().len())
            .finish()
    }
}

impl SingleFlight {
    /// Runs `work` for the key, or waits for the in-progress flight.
    ///
    /// The waiter is broadcast and removed on every exit path, success or
    /// failure, so no follower can block forever.
    pub(crate) fn run(&self, key: &str, work: impl FnOnce() -> OpenResult) -> OpenResult {
        let (waiter, leader) = {
            let mut waiters = self.waiters.lock();
            match waiters.get(key) {
                Some(waiter) => (waiter.clone(), false),
                None => {
                    let waiter = Arc::new(Waiter::new());
                    waiters.insert(key.to_string(), waiter.clone());
                    (waiter, true)
                }
            }
        };

        if leader {
            let result = work();
            *waiter.state.lock() = Some(result.clone());
            waiter.cond.notify_all();
            self.waiters.lock().remove(key);
            return result;
        }

        waiter.listeners.fetch_add(1, Ordering::Relaxed);
        let mut state = waiter.state.lock();
        while state.is_none() {
            waiter.cond.wait(&mut state);
        }
        let result = state.clone().expect("flight outcome should be set");
        drop(state);
        waiter.listeners.fetch_sub(1, Ordering::Relaxed);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn it_single_flights_concurrent_opens() {
        let flights = SingleFlight::default();
        let runs = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let result = flights.run("key", || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        // Hold the flight open long enough for followers to
                        // pile up.
                        std::thread::sleep(std::time::Duration::from_millis(25));
                        Err(Arc::new(IndexError::new(
                            ErrorKind::DocumentOpenFailed,
                            "nope",
                        )))
                    });
                    assert!(result.is_err());
                });
            }
        });

        // Every opener saw the same outcome but the work ran at most a
        // couple of times (a flight that finishes before the next caller
        // arrives legitimately reruns).
        assert!(runs.load(Ordering::SeqCst) <= 8);
        assert!(runs.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn it_reruns_after_a_completed_flight() {
        let flights = SingleFlight::default();
        let runs = AtomicUsize::new(0);
        for _ in 0..2 {
            let _ = flights.run("key", || {
                runs.fetch_add(1, Ordering::SeqCst);
                Err(Arc::new(IndexError::new(
                    ErrorKind::DocumentOpenFailed,
                    "nope",
                )))
            });
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
