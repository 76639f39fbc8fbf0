//! Single-threaded cooperative slicer.
//!
//! A [`Slicer`] owns a queue of *slices*: resumable step sequences written as
//! `async` blocks. Each scheduling pass ([`Slicer::run_frame`]) resumes the
//! queued slices in order. A slice suspends by awaiting one of the step
//! directives on its [`SliceContext`]:
//!
//! | Directive | Effect on the pass                                        |
//! |-----------|-----------------------------------------------------------|
//! | `stall`   | always yields; slice moves to the front, pass ends        |
//! | `hold`    | yields only when the pass budget is spent; pass ends      |
//! | `delay`   | yields; slice moves to the back of the queue              |
//! | `wait`    | yields; slice keeps its position, next slice runs         |
//!
//! Returning `Err(Cancelled)` aborts the slice immediately.
//!
//! Slices are polled with a no-op waker. Anything a slice awaits besides the
//! step directives is treated as `delay` while it is pending, which makes
//! polling background work with plain futures safe.
//!
//! # Example
//!
//! ```ignore
//! let slicer = Slicer::new();
//! let handle = slicer.slice("build", |ctx| async move {
//!     encode_positions();
//!     ctx.stall().await;
//!     while !task.is_finished() {
//!         ctx.delay().await;
//!     }
//!     Ok(())
//! });
//!
//! while slicer.has_work() {
//!     slicer.run_frame();
//! }
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::cancellation::Cancelled;

/// Result of a completed slice. `Err(Cancelled)` marks a cancelled slice.
pub type SliceResult = Result<(), Cancelled>;

/// Deferred action run by the slicer on its owning thread.
pub type SliceAction = Box<dyn FnOnce(&Slicer) + Send>;

type SliceFuture = Pin<Box<dyn Future<Output = SliceResult>>>;

/// Suspension directive issued by a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceStep {
    /// Yield unconditionally; resume first on the next pass.
    Stall,
    /// Yield only if the pass budget is exhausted.
    Hold,
    /// Yield and move to the back of the queue.
    Delay,
    /// Yield without changing queue order.
    Wait,
}

/// Lifecycle state of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceState {
    /// Queued and resumable.
    Running,
    /// Suspended by a `hold` because the pass budget ran out.
    Held,
    /// Aborted by the slice itself, its handle, or an emergency shutdown.
    Cancelled,
    /// Ran to completion.
    Completed,
}

impl SliceState {
    /// Returns true while the slice can still be resumed.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::Held)
    }
}

/// Identifier of a slice, unique per slicer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SliceId(u64);

struct SliceEntry {
    id: SliceId,
    name: String,
    state: Rc<Cell<SliceState>>,
    future: SliceFuture,
}

struct SlicerInner {
    queue: RefCell<VecDeque<SliceEntry>>,
    slicing: Cell<bool>,
    directive: Cell<Option<SliceStep>>,
    budget: Cell<Option<Duration>>,
    pass_start: Cell<Option<Instant>>,
    next_id: Cell<u64>,
    cleanup_tx: Sender<SliceAction>,
    cleanup_rx: Receiver<SliceAction>,
    alloc_tx: Sender<SliceAction>,
    alloc_rx: Receiver<SliceAction>,
}

impl SlicerInner {
    fn has_budget(&self) -> bool {
        match (self.budget.get(), self.pass_start.get()) {
            (Some(budget), Some(start)) => start.elapsed() < budget,
            _ => true,
        }
    }

    /// Removes a queued entry, returning it so the caller can drop it
    /// after the queue borrow is released.
    fn take_entry(&self, id: SliceId) -> Option<SliceEntry> {
        let mut queue = self.queue.try_borrow_mut().ok()?;
        let position = queue.iter().position(|entry| entry.id == id)?;
        queue.remove(position)
    }
}

impl Drop for SlicerInner {
    fn drop(&mut self) {
        let queue = self.queue.get_mut();
        let leaked: Vec<&str> = queue
            .iter()
            .filter(|entry| entry.state.get().is_live())
            .map(|entry| entry.name.as_str())
            .collect();
        if !leaked.is_empty() {
            log::error!(
                "Slicer dropped with {} unfinished slice(s): {:?}",
                leaked.len(),
                leaked
            );
        }
        for entry in queue.iter() {
            if entry.state.get().is_live() {
                entry.state.set(SliceState::Cancelled);
            }
        }
    }
}

/// Cooperative scheduler for slices.
///
/// The slicer is single-threaded: it is neither `Send` nor `Sync`, and all
/// slices run on the thread that owns it. Cloning a `Slicer` yields another
/// handle to the same queue. Other threads post work back through a
/// [`SlicePoster`].
#[derive(Clone)]
pub struct Slicer {
    inner: Rc<SlicerInner>,
}

impl Slicer {
    /// Creates a slicer with an unlimited pass budget.
    pub fn new() -> Self {
        Self::with_budget(None)
    }

    /// Creates a slicer with the given per-pass time budget.
    ///
    /// `None` means unlimited: `hold` never yields.
    pub fn with_budget(budget: Option<Duration>) -> Self {
        let (cleanup_tx, cleanup_rx) = unbounded();
        let (alloc_tx, alloc_rx) = unbounded();
        Self {
            inner: Rc::new(SlicerInner {
                queue: RefCell::new(VecDeque::new()),
                slicing: Cell::new(false),
                directive: Cell::new(None),
                budget: Cell::new(budget),
                pass_start: Cell::new(None),
                next_id: Cell::new(1),
                cleanup_tx,
                cleanup_rx,
                alloc_tx,
                alloc_rx,
            }),
        }
    }

    /// Sets the per-pass time budget.
    pub fn set_budget(&self, budget: Option<Duration>) {
        self.inner.budget.set(budget);
    }

    /// Returns the per-pass time budget.
    pub fn budget(&self) -> Option<Duration> {
        self.inner.budget.get()
    }

    /// Returns true while the current pass has budget left.
    ///
    /// Outside of a pass this is always true.
    pub fn has_budget(&self) -> bool {
        self.inner.has_budget()
    }

    /// Returns true while a pass is resuming slices.
    pub fn is_slicing(&self) -> bool {
        self.inner.slicing.get()
    }

    /// Number of slices currently queued.
    pub fn len(&self) -> usize {
        self.inner
            .queue
            .try_borrow()
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    /// Returns true if no slices are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if slices or posted actions are pending.
    pub fn has_work(&self) -> bool {
        !self.is_empty() || !self.inner.cleanup_rx.is_empty() || !self.inner.alloc_rx.is_empty()
    }

    /// Returns a thread-safe handle for posting actions to this slicer.
    pub fn poster(&self) -> SlicePoster {
        SlicePoster {
            cleanup_tx: self.inner.cleanup_tx.clone(),
            alloc_tx: self.inner.alloc_tx.clone(),
        }
    }

    /// Queues a new slice.
    ///
    /// `body` receives the [`SliceContext`] used to issue step directives.
    /// The slice does not run until the next pass.
    pub fn slice<F, Fut>(&self, name: impl Into<String>, body: F) -> SliceHandle
    where
        F: FnOnce(SliceContext) -> Fut,
        Fut: Future<Output = SliceResult> + 'static,
    {
        let id = SliceId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);

        let name = name.into();
        let state = Rc::new(Cell::new(SliceState::Running));
        let context = SliceContext {
            inner: Rc::downgrade(&self.inner),
        };
        let entry = SliceEntry {
            id,
            name: name.clone(),
            state: Rc::clone(&state),
            future: Box::pin(body(context)),
        };
        self.inner.queue.borrow_mut().push_back(entry);

        log::trace!("Slicer: queued slice {:?} '{}'", id, name);

        SliceHandle {
            id,
            name,
            state: Some(state),
            slicer: Rc::downgrade(&self.inner),
        }
    }

    /// Runs one scheduling pass.
    ///
    /// Posted cleanup actions run first, then queued slices, then posted
    /// allocation actions if budget remains.
    pub fn run_frame(&self) {
        if self.inner.slicing.get() {
            log::error!("Slicer: run_frame called re-entrantly from inside a slice");
            return;
        }

        crate::profile_scope!("slicer_run_frame");
        self.inner.pass_start.set(Some(Instant::now()));

        if self.has_budget() {
            self.run_frame_inner();
        }

        self.inner.pass_start.set(None);
        crate::profile_plot!("slicer_queue", self.len());
        crate::frame_mark!();
    }

    fn run_frame_inner(&self) {
        while let Ok(action) = self.inner.cleanup_rx.try_recv() {
            action(self);
            if !self.has_budget() {
                return;
            }
        }

        self.run_slices();

        while self.has_budget()
            && let Ok(action) = self.inner.alloc_rx.try_recv()
        {
            action(self);
        }
    }

    fn run_slices(&self) {
        let mut work = std::mem::take(&mut *self.inner.queue.borrow_mut());
        self.inner.slicing.set(true);

        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);

        let mut index = 0;
        let mut stop = work.len();
        while index < stop && index < work.len() {
            if !work[index].state.get().is_live() {
                let _dead = work.remove(index);
                stop -= 1;
                continue;
            }

            work[index].state.set(SliceState::Running);
            self.inner.directive.set(None);
            let poll = work[index].future.as_mut().poll(&mut cx);
            let directive = self.inner.directive.take();

            let keep_going = match poll {
                Poll::Ready(result) => {
                    if let Some(entry) = work.remove(index) {
                        let state = if result.is_ok() {
                            SliceState::Completed
                        } else {
                            SliceState::Cancelled
                        };
                        // A handle may have cancelled the slice while it ran.
                        if entry.state.get().is_live() {
                            entry.state.set(state);
                        }
                        log::trace!(
                            "Slicer: slice {:?} '{}' finished as {:?}",
                            entry.id,
                            entry.name,
                            entry.state.get()
                        );
                    }
                    stop -= 1;
                    true
                }
                Poll::Pending if !work[index].state.get().is_live() => {
                    let _cancelled = work.remove(index);
                    stop -= 1;
                    true
                }
                Poll::Pending => match directive.unwrap_or(SliceStep::Delay) {
                    SliceStep::Stall => {
                        if let Some(entry) = work.remove(index) {
                            work.push_front(entry);
                        }
                        false
                    }
                    SliceStep::Hold => {
                        work[index].state.set(SliceState::Held);
                        false
                    }
                    SliceStep::Delay => {
                        if let Some(entry) = work.remove(index) {
                            work.push_back(entry);
                        }
                        stop -= 1;
                        true
                    }
                    SliceStep::Wait => {
                        index += 1;
                        true
                    }
                },
            };

            if !keep_going || !self.has_budget() {
                break;
            }
        }

        self.inner.slicing.set(false);
        work.retain(|entry| entry.state.get().is_live());

        let added = std::mem::take(&mut *self.inner.queue.borrow_mut());
        work.extend(added);
        let previous = std::mem::replace(&mut *self.inner.queue.borrow_mut(), work);
        drop(previous);
    }

    /// Cancels every queued slice, runs posted cleanup actions and drops
    /// posted allocation actions.
    pub fn cancel_all(&self) {
        if self.inner.slicing.get() {
            log::error!("Slicer: cancel_all called from inside a slice");
            return;
        }

        let drained = std::mem::take(&mut *self.inner.queue.borrow_mut());
        if !drained.is_empty() {
            log::warn!("Slicer: cancelling {} queued slice(s)", drained.len());
        }
        for entry in &drained {
            if entry.state.get().is_live() {
                entry.state.set(SliceState::Cancelled);
            }
        }
        drop(drained);

        while let Ok(action) = self.inner.cleanup_rx.try_recv() {
            action(self);
        }
        while self.inner.alloc_rx.try_recv().is_ok() {}
    }

    /// Cancels a slice by id. Returns true if it was still live.
    fn cancel_slice(&self, id: SliceId) -> bool {
        match self.inner.take_entry(id) {
            Some(entry) => {
                let was_live = entry.state.get().is_live();
                entry.state.set(SliceState::Cancelled);
                drop(entry);
                was_live
            }
            None => false,
        }
    }

    /// Drops queued slices that are no longer live.
    fn purge_dead(&self) {
        let dead: Vec<SliceEntry> = {
            let Ok(mut queue) = self.inner.queue.try_borrow_mut() else {
                return;
            };
            let (live, dead): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut *queue)
                .into_iter()
                .partition(|entry| entry.state.get().is_live());
            *queue = live;
            dead.into_iter().collect()
        };
        drop(dead);
    }
}

impl Default for Slicer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Slicer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slicer")
            .field("queued", &self.len())
            .field("budget", &self.budget())
            .field("slicing", &self.is_slicing())
            .finish()
    }
}

/// Thread-safe handle for posting actions to a [`Slicer`].
///
/// Cleanup actions run at the start of the next pass; allocation actions
/// run at its end if budget remains.
#[derive(Clone)]
pub struct SlicePoster {
    cleanup_tx: Sender<SliceAction>,
    alloc_tx: Sender<SliceAction>,
}

impl SlicePoster {
    /// Posts an action to run before slices on the next pass.
    pub fn post_cleanup(&self, action: impl FnOnce(&Slicer) + Send + 'static) {
        if self.cleanup_tx.send(Box::new(action)).is_err() {
            log::warn!("SlicePoster: slicer dropped, cleanup action discarded");
        }
    }

    /// Posts an action to run after slices on the next pass.
    pub fn post_alloc(&self, action: impl FnOnce(&Slicer) + Send + 'static) {
        if self.alloc_tx.send(Box::new(action)).is_err() {
            log::warn!("SlicePoster: slicer dropped, allocation action discarded");
        }
    }
}

static_assertions::assert_impl_all!(SlicePoster: Send, Sync);

/// Step directives available inside a slice.
#[derive(Clone)]
pub struct SliceContext {
    inner: Weak<SlicerInner>,
}

impl SliceContext {
    /// Yield unconditionally; the slice resumes first on the next pass.
    pub fn stall(&self) -> SliceYield {
        self.step(SliceStep::Stall)
    }

    /// Yield only if the current pass has run out of budget.
    pub fn hold(&self) -> SliceYield {
        self.step(SliceStep::Hold)
    }

    /// Yield and retry after the other queued slices.
    pub fn delay(&self) -> SliceYield {
        self.step(SliceStep::Delay)
    }

    /// Yield without losing the slice's place in the queue.
    pub fn wait(&self) -> SliceYield {
        self.step(SliceStep::Wait)
    }

    /// Returns true if a `hold` would yield right now.
    pub fn should_hold(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| !inner.has_budget())
    }

    fn step(&self, step: SliceStep) -> SliceYield {
        SliceYield {
            step,
            inner: self.inner.clone(),
            yielded: false,
        }
    }
}

/// Future returned by the [`SliceContext`] directives.
#[must_use = "step directives do nothing unless awaited"]
pub struct SliceYield {
    step: SliceStep,
    inner: Weak<SlicerInner>,
    yielded: bool,
}

impl Future for SliceYield {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        let Some(inner) = self.inner.upgrade() else {
            return Poll::Ready(());
        };
        if self.step == SliceStep::Hold && inner.has_budget() {
            return Poll::Ready(());
        }
        inner.directive.set(Some(self.step));
        self.yielded = true;
        Poll::Pending
    }
}

/// Owner-side handle to a queued slice.
///
/// Dropping the handle does not cancel the slice.
pub struct SliceHandle {
    id: SliceId,
    name: String,
    state: Option<Rc<Cell<SliceState>>>,
    slicer: Weak<SlicerInner>,
}

impl SliceHandle {
    /// Creates a handle that refers to no slice.
    pub fn invalid() -> Self {
        Self {
            id: SliceId(0),
            name: String::new(),
            state: None,
            slicer: Weak::new(),
        }
    }

    /// Slice id.
    pub fn id(&self) -> SliceId {
        self.id
    }

    /// Slice name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, or `None` once the handle has been cleared.
    pub fn state(&self) -> Option<SliceState> {
        self.state.as_ref().map(|state| state.get())
    }

    /// Returns true while the slice can still be resumed.
    pub fn is_valid(&self) -> bool {
        self.state().is_some_and(|state| state.is_live())
    }

    /// Cancels the slice.
    ///
    /// Returns true if the slice was live and is now cancelled. Cancelling
    /// a completed, cancelled or cleared slice is a no-op returning false.
    /// The handle is cleared either way.
    pub fn cancel(&mut self) -> bool {
        let Some(state) = self.state.take() else {
            return false;
        };
        if !state.get().is_live() {
            return false;
        }
        state.set(SliceState::Cancelled);
        log::trace!("Slicer: cancelled slice {:?} '{}'", self.id, self.name);

        if let Some(inner) = self.slicer.upgrade()
            && let Some(entry) = inner.take_entry(self.id)
        {
            drop(entry);
        }
        true
    }

    /// Forgets the slice without cancelling it.
    pub fn clear(&mut self) {
        self.state = None;
    }

    /// Force-invalidates the slice without resuming it again.
    ///
    /// Used when the slice owner is torn down without a proper dispose. The
    /// slice is marked cancelled at once; its queue entry is removed by a
    /// cleanup action on the next pass.
    pub fn emergency_shutdown(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        if !state.get().is_live() {
            return;
        }
        log::error!(
            "EmergencyShutdown activated for slice '{}', remaining steps will not run",
            self.name
        );
        state.set(SliceState::Cancelled);

        if let Some(inner) = self.slicer.upgrade() {
            let id = self.id;
            let action: SliceAction = Box::new(move |slicer: &Slicer| {
                if !slicer.cancel_slice(id) {
                    slicer.purge_dead();
                }
            });
            if inner.cleanup_tx.send(action).is_err() {
                log::warn!("Slicer: emergency shutdown could not post cleanup");
            }
        }
    }
}

impl Default for SliceHandle {
    fn default() -> Self {
        Self::invalid()
    }
}

impl std::fmt::Debug for SliceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SliceHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
