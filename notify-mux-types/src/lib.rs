//! Types used by the notify-mux crate
//!
//! These are kept apart from the main crate so that code which only produces or consumes
//! records (test harnesses, replay tools, serializers) does not pull in the channel layer.

#![deny(missing_docs)]

pub mod event;
pub mod mask;
