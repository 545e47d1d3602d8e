//! fv-fragments: fixed-count file fragmentation
//!
//! A file is cut into exactly `n` contiguous slices of `ceil(len / n)` bytes;
//! the tail slices absorb the remainder and may be short or empty. Splitting
//! is deterministic, so the same input and count always yield the same
//! boundaries.

pub mod fragment;

pub use fragment::{fragment_size, fragment_sizes, reassemble, split};
