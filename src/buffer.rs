//! The one growable allocation backing a bitmap, with coordinated
//! 16-bit and 64-bit views over the same bytes.
//!
//! Backing the storage with `Vec<u64>` guarantees the 8-byte alignment
//! the 64-bit view requires; everything else in the crate addresses the
//! buffer in 16-bit-word units, so every tracked length is a multiple of
//! four words. The reinterpretations below are the only unsafe code in
//! the crate.
//!
//! Any growth may reallocate, which invalidates previously derived
//! slices; callers re-derive their directory and container views after
//! every operation that can grow the buffer. The borrow checker enforces
//! this for us.

use std::slice;

#[derive(Clone, Default)]
pub(crate) struct Buffer {
    words: Vec<u64>,
}

impl Buffer {
    /// A zeroed buffer of `n_u64` 64-bit words.
    pub(crate) fn with_u64_len(n_u64: usize) -> Self {
        Self {
            words: vec![0; n_u64],
        }
    }

    /// Used length in 16-bit words.
    #[inline]
    pub(crate) fn len_u16(&self) -> usize {
        self.words.len() * 4
    }

    /// Grows the used length to `new_len` 16-bit words, zero-filling the
    /// tail. `new_len` must be a multiple of four. Growth is amortized:
    /// `Vec` at least doubles its capacity when it reallocates.
    pub(crate) fn grow_to(&mut self, new_len: usize) {
        debug_assert_eq!(new_len % 4, 0);
        debug_assert!(new_len >= self.len_u16());
        self.words.resize(new_len / 4, 0);
    }

    /// Shrinks the used length to `new_len` 16-bit words. Capacity is
    /// retained for future growth.
    pub(crate) fn shrink_to(&mut self, new_len: usize) {
        debug_assert_eq!(new_len % 4, 0);
        debug_assert!(new_len <= self.len_u16());
        self.words.truncate(new_len / 4);
    }

    #[inline]
    pub(crate) fn u64s(&self) -> &[u64] {
        &self.words
    }

    #[inline]
    pub(crate) fn u64s_mut(&mut self) -> &mut [u64] {
        &mut self.words
    }

    /// The whole used buffer as 16-bit words.
    ///
    /// Word `i` of the 64-bit view covers words `4i..4i+4` of this view.
    #[inline]
    pub(crate) fn u16s(&self) -> &[u16] {
        // SAFETY: u16 has weaker alignment than u64, the length covers
        // exactly the same bytes, and both types are plain integers with
        // no invalid bit patterns.
        unsafe { slice::from_raw_parts(self.words.as_ptr().cast::<u16>(), self.words.len() * 4) }
    }

    #[inline]
    pub(crate) fn u16s_mut(&mut self) -> &mut [u16] {
        // SAFETY: as in `u16s`; the mutable borrow of `self` guarantees
        // exclusivity.
        unsafe {
            slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u16>(), self.words.len() * 4)
        }
    }

    /// The used buffer as raw bytes. This is the serialized form: on
    /// little-endian targets the bytes are the wire format verbatim.
    #[inline]
    pub(crate) fn bytes(&self) -> &[u8] {
        // SAFETY: as in `u16s`.
        unsafe { slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.words.len() * 8) }
    }
}
