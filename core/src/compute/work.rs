//! Background work units.
//!
//! A [`WorkPool`] runs closures on a `rayon` thread pool. Each spawned unit
//! returns a [`WorkHandle`] that the owning slice polls (never blocks on) to
//! learn whether the unit completed, faulted or observed cancellation.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;

use super::cancellation::{CancellationToken, Cancelled};

/// Error reported by a background work unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkError {
    /// The unit observed its cancellation token.
    #[error("work cancelled")]
    Cancelled,
    /// The unit reported a failure.
    #[error("work failed: {0}")]
    Failed(String),
    /// The unit panicked.
    #[error("work panicked: {0}")]
    Panicked(String),
}

impl From<Cancelled> for WorkError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Observable status of a work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkStatus {
    /// Queued or running.
    Running,
    /// Finished with a value.
    Completed,
    /// Finished with a failure or panic.
    Faulted,
    /// Finished by observing cancellation.
    Cancelled,
}

impl WorkStatus {
    /// Returns true once the unit has stopped running.
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

enum Slot<T> {
    Running,
    Done(Result<T, WorkError>),
    Taken(WorkStatus),
}

struct Shared<T> {
    label: String,
    slot: Mutex<Slot<T>>,
}

impl<T> Shared<T> {
    fn status(&self) -> WorkStatus {
        match &*self.slot.lock() {
            Slot::Running => WorkStatus::Running,
            Slot::Done(Ok(_)) => WorkStatus::Completed,
            Slot::Done(Err(WorkError::Cancelled)) => WorkStatus::Cancelled,
            Slot::Done(Err(_)) => WorkStatus::Faulted,
            Slot::Taken(status) => *status,
        }
    }
}

/// Handle to the result of a background work unit.
pub struct WorkHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> WorkHandle<T> {
    /// Label given at spawn time.
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Current status.
    pub fn status(&self) -> WorkStatus {
        self.shared.status()
    }

    /// Returns true once the unit has stopped running.
    pub fn is_finished(&self) -> bool {
        self.status().is_finished()
    }

    /// Returns true if the unit failed or panicked.
    pub fn is_faulted(&self) -> bool {
        self.status() == WorkStatus::Faulted
    }

    /// Returns the failure message of a faulted unit.
    pub fn error(&self) -> Option<WorkError> {
        match &*self.shared.slot.lock() {
            Slot::Done(Err(err)) if *err != WorkError::Cancelled => Some(err.clone()),
            _ => None,
        }
    }

    /// Takes the result out of a finished unit.
    ///
    /// Returns `None` while the unit is running or after the result was
    /// already taken. The status stays observable after taking.
    pub fn take(&self) -> Option<Result<T, WorkError>> {
        let mut slot = self.shared.slot.lock();
        let status = match &*slot {
            Slot::Done(Ok(_)) => WorkStatus::Completed,
            Slot::Done(Err(WorkError::Cancelled)) => WorkStatus::Cancelled,
            Slot::Done(Err(_)) => WorkStatus::Faulted,
            Slot::Running | Slot::Taken(_) => return None,
        };
        match std::mem::replace(&mut *slot, Slot::Taken(status)) {
            Slot::Done(result) => Some(result),
            _ => None,
        }
    }

    /// Returns a type-erased probe for status checks.
    pub fn probe(&self) -> WorkProbe
    where
        T: Send + 'static,
    {
        WorkProbe {
            shared: Arc::clone(&self.shared) as Arc<dyn StatusSource>,
        }
    }
}

impl<T> std::fmt::Debug for WorkHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkHandle")
            .field("label", &self.shared.label)
            .field("status", &self.status())
            .finish()
    }
}

trait StatusSource: Send + Sync {
    fn status(&self) -> WorkStatus;
    fn label(&self) -> &str;
}

impl<T: Send> StatusSource for Shared<T> {
    fn status(&self) -> WorkStatus {
        Shared::status(self)
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// Type-erased view of a work unit's status.
///
/// Owners keep probes for every unit they spawned so cancellation can wait
/// until all of them have stopped.
#[derive(Clone)]
pub struct WorkProbe {
    shared: Arc<dyn StatusSource>,
}

impl WorkProbe {
    /// Current status.
    pub fn status(&self) -> WorkStatus {
        self.shared.status()
    }

    /// Label given at spawn time.
    pub fn label(&self) -> &str {
        self.shared.label()
    }
}

impl std::fmt::Debug for WorkProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkProbe")
            .field("label", &self.label())
            .field("status", &self.status())
            .finish()
    }
}

/// Pool of background worker threads.
pub struct WorkPool {
    pool: rayon::ThreadPool,
}

impl WorkPool {
    /// Creates a pool with `threads` workers (0 picks rayon's default).
    pub fn new(threads: usize) -> Result<Self, WorkError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("meshweave-worker-{index}"))
            .start_handler(|index| {
                crate::set_thread_name!(format!("meshweave-worker-{index}").as_str());
            })
            .build()
            .map_err(|err| WorkError::Failed(format!("failed to build worker pool: {err}")))?;
        log::debug!("WorkPool: started {} worker(s)", pool.current_num_threads());
        Ok(Self { pool })
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Spawns a unit of work.
    ///
    /// The unit does not start if `token` is already cancelled. Panics inside
    /// `work` are caught and reported as [`WorkStatus::Faulted`].
    pub fn spawn<T, F>(
        &self,
        label: impl Into<String>,
        token: &CancellationToken,
        work: F,
    ) -> WorkHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken) -> Result<T, WorkError> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            label: label.into(),
            slot: Mutex::new(Slot::Running),
        });
        let handle = WorkHandle {
            shared: Arc::clone(&shared),
        };
        let token = token.clone();

        self.pool.spawn(move || {
            let result = if token.is_cancelled() {
                Err(WorkError::Cancelled)
            } else {
                crate::profile_scope!("work_unit");
                match catch_unwind(AssertUnwindSafe(|| work(&token))) {
                    Ok(result) => result,
                    Err(payload) => Err(WorkError::Panicked(panic_message(payload.as_ref()))),
                }
            };
            if let Err(err) = &result
                && *err != WorkError::Cancelled
            {
                log::trace!("WorkPool: unit '{}' faulted: {}", shared.label, err);
            }
            *shared.slot.lock() = Slot::Done(result);
        });

        handle
    }
}

impl std::fmt::Debug for WorkPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkPool")
            .field("threads", &self.thread_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// Ensure WorkPool and WorkProbe are Send + Sync
static_assertions::assert_impl_all!(WorkPool: Send, Sync);
static_assertions::assert_impl_all!(WorkProbe: Send, Sync);
