//! Cooperative scheduling and background work.
//!
//! - [`Slicer`]: single-threaded cooperative scheduler running step sequences
//!   (slices) once per pass under a time budget
//! - [`WorkPool`]: background worker threads whose results are polled by slices
//! - [`CancellationToken`]: shared cooperative cancellation flag
//!
//! Slices never block on background work. They spawn a unit on the
//! [`WorkPool`], then `delay` until its [`WorkHandle`] reports a finished
//! status.

mod cancellation;
mod slicer;
mod work;

pub use cancellation::{CancellationToken, Cancelled};
pub use slicer::{
    SliceAction, SliceContext, SliceHandle, SliceId, SlicePoster, SliceResult, SliceState,
    SliceStep, SliceYield, Slicer,
};
pub use work::{WorkError, WorkHandle, WorkPool, WorkProbe, WorkStatus};
