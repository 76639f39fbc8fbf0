//! Tracy instrumentation behind the `profiling` feature.
//!
//! Every macro here expands to nothing unless `meshweave-core` is built with
//! `profiling`, so call sites in downstream crates need no `cfg` of their own.
//!
//! ```ignore
//! fn encode_block() {
//!     meshweave_core::profile_function!();
//!     {
//!         meshweave_core::profile_scope!("pack_normals");
//!     }
//! }
//! ```
//!
//! The slicer ends every pass with [`frame_mark!`] and plots its queue length
//! as `slicer_queue`.

#[cfg(feature = "profiling")]
#[doc(hidden)]
pub mod backend {
    pub use tracy_client::{Client, frame_mark, plot, span};
}

#[cfg(feature = "profiling")]
#[doc(hidden)]
#[macro_export]
macro_rules! __if_profiling {
    ($($body:tt)*) => { $($body)* };
}

#[cfg(not(feature = "profiling"))]
#[doc(hidden)]
#[macro_export]
macro_rules! __if_profiling {
    ($($body:tt)*) => {};
}

/// Ends a slicer pass in the capture.
#[macro_export]
macro_rules! frame_mark {
    () => {
        $crate::__if_profiling! { $crate::profiling::backend::frame_mark(); }
    };
}

/// Opens a span that closes with the enclosing scope.
#[macro_export]
macro_rules! profile_scope {
    ($name:expr) => {
        $crate::__if_profiling! { let _profile_span = $crate::profiling::backend::span!($name); }
    };
}

/// Opens a span named after the enclosing function.
#[macro_export]
macro_rules! profile_function {
    () => {
        $crate::__if_profiling! { let _profile_span = $crate::profiling::backend::span!(); }
    };
}

#[macro_export]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        $crate::__if_profiling! { $crate::profiling::backend::plot!($name, $value as f64); }
    };
}

/// Names the calling thread; used for work pool threads.
#[macro_export]
macro_rules! set_thread_name {
    ($name:expr) => {
        $crate::__if_profiling! {
            if let Some(client) = $crate::profiling::backend::Client::running() {
                client.set_thread_name($name);
            }
        }
    };
}

pub use crate::{frame_mark, profile_function, profile_plot, profile_scope, set_thread_name};

#[cfg(test)]
mod tests {
    #[test]
    fn macros_expand_in_statement_position() {
        profile_scope!("scope");
        profile_function!();
        profile_plot!("queue", 3);
        set_thread_name!("worker");
        frame_mark!();
    }
}
