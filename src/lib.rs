//! roarbuf: Roaring-style 64-bit bitmaps in a single flat buffer.
//!
//! A [`Bitmap`] is a compressed set of `u64`s. Like a classical Roaring
//! bitmap it splits each value into a high 48-bit *key* selecting a
//! *container* and a low 16-bit position inside it, with two container
//! encodings: a sorted `u16` array for sparse chunks and a 65536-bit
//! bitmap for dense ones. Unlike the classical layout, the entire
//! structure — key directory and every container — lives in one
//! contiguous, 8-byte-aligned, growable buffer:
//!
//! - [`Bitmap::to_buffer`] is a borrow of that buffer, not a
//!   serialization pass; the bytes can be written to disk or the wire
//!   as-is.
//! - [`Bitmap::from_buffer`] reads a foreign buffer (for example a
//!   memory-mapped file) in place through a read-only [`BitmapView`].
//! - There is no per-container heap allocation and no pointer graph;
//!   growth happens by shifting buffer regions (`scoot`) and patching
//!   the directory's offsets.
//!
//! Mutation ([`Bitmap::set`], [`Bitmap::remove`],
//! [`Bitmap::remove_range`]), the pairwise set operations
//! ([`and`], [`or`], [`and_not`] and their in-place `*_with` forms),
//! iteration, and the pre-sizing multi-way unions [`fast_or`] /
//! [`fast_par_or`] are all supported on top of that single allocation.
//!
//! ```
//! use roarbuf::Bitmap;
//!
//! let mut bm = Bitmap::new();
//! bm.set(1);
//! bm.set(u64::MAX);
//! assert!(bm.contains(1));
//! assert_eq!(bm.cardinality(), 2);
//!
//! let back = Bitmap::from_buffer_copy(bm.to_buffer());
//! assert_eq!(back.to_vec(), vec![1, u64::MAX]);
//! ```
//!
//! A bitmap is single-threaded: one writer, or any number of readers.
//! [`fast_par_or`] parallelizes across *groups of bitmaps*, each worker
//! owning its inputs and output exclusively.

mod bitmap;
mod buffer;
mod container;
mod errors;
mod iter;
mod keys;
mod ops;
mod types;
mod view;

pub use bitmap::Bitmap;
pub use errors::{Error, Result};
pub use iter::BitmapIter;
pub use ops::{and, and_not, fast_and, fast_or, fast_par_or, or};
pub use view::{BitmapView, ViewIter};
