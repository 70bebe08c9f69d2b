//! The bitmap engine: owns the buffer, routes operations to container
//! kernels, and maintains the directory/offset invariants across
//! in-place growth.

use std::fmt;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::buffer::Buffer;
use crate::container::{
    self, array, bitmap as bitc, HEADER_WORDS, IDX_SIZE, IDX_TYPE, MAX_CONTAINER_SIZE,
    MIN_CONTAINER_SIZE, TYPE_ARRAY, TYPE_BITMAP,
};
use crate::errors::{Error, Result};
use crate::iter::BitmapIter;
use crate::keys;
use crate::types::{low16, round_up4, KEY_MASK};
use crate::view::{validate_buffer, BitmapView};

/// A set of `u64`s stored as a Roaring-style two-level structure inside
/// one contiguous, growable buffer.
///
/// The high 48 bits of a value select a container via the sorted key
/// directory at the head of the buffer; the low 16 bits address a slot
/// in that container. Because directory and containers live in the same
/// allocation, [`Bitmap::to_buffer`] is a borrow, not a serialization
/// pass, and [`Bitmap::from_buffer`] reads a foreign buffer in place.
///
/// A bitmap is single-threaded: `&mut` operations may grow and shift
/// the buffer. Shared references are safe to read from concurrently.
pub struct Bitmap {
    b: Buffer,
}

/// Array containers grow by doubling until this size, then promote to
/// bitmap form. 2048 words is also the largest array the growth
/// schedule in `copy_at` will produce.
const PROMOTE_SIZE: usize = 2048;

/// Cap on a single directory doubling, kept at the buffer's four-word
/// granularity.
const MAX_NODE_GROW: usize = 0xFFFC;

fn region_hash(words: &[u16]) -> u64 {
    let mut h = FxHasher::default();
    words.hash(&mut h);
    h.finish()
}

impl Bitmap {
    /// An empty bitmap, holding the reserved container for key 0.
    pub fn new() -> Self {
        Self::with_capacity(2)
    }

    /// An empty bitmap whose directory can hold `n_keys` entries before
    /// its first in-place doubling.
    pub fn with_capacity(n_keys: usize) -> Self {
        let n_keys = n_keys.max(2);
        let node_u64 = keys::NODE_START + 2 * n_keys;
        let mut bm = Bitmap {
            b: Buffer::with_u64_len(node_u64),
        };
        bm.b.u64s_mut()[keys::IDX_NODE_SIZE] = (node_u64 * 4) as u64;
        // The zero-key container always exists; without it an empty
        // directory slot would be indistinguishable from key 0.
        let off = bm.new_container(MIN_CONTAINER_SIZE);
        keys::set(bm.node_mut(), 0, off as u64);
        bm
    }

    // ------------------------------------------------------------------
    // Views. All are ephemeral: any growth invalidates them, which the
    // borrow checker turns into a compile-time rule.
    // ------------------------------------------------------------------

    #[inline]
    fn node_size_u16(&self) -> usize {
        self.b.u64s()[keys::IDX_NODE_SIZE] as usize
    }

    #[inline]
    pub(crate) fn node(&self) -> &[u64] {
        &self.b.u64s()[..self.node_size_u16() / 4]
    }

    #[inline]
    fn node_mut(&mut self) -> &mut [u64] {
        let n = self.node_size_u16() / 4;
        &mut self.b.u64s_mut()[..n]
    }

    #[inline]
    pub(crate) fn num_keys(&self) -> usize {
        keys::num_keys(self.node())
    }

    #[inline]
    pub(crate) fn entry_key(&self, i: usize) -> u64 {
        keys::key(self.node(), i)
    }

    #[inline]
    pub(crate) fn entry_val(&self, i: usize) -> usize {
        keys::val(self.node(), i) as usize
    }

    pub(crate) fn get_container(&self, offset: usize) -> &[u16] {
        let u = self.b.u16s();
        let sz = u[offset + IDX_SIZE] as usize;
        assert!(sz >= HEADER_WORDS, "corrupt container at offset {offset}");
        &u[offset..offset + sz]
    }

    pub(crate) fn get_container_mut(&mut self, offset: usize) -> &mut [u16] {
        let u = self.b.u16s_mut();
        let sz = u[offset + IDX_SIZE] as usize;
        assert!(sz >= HEADER_WORDS, "corrupt container at offset {offset}");
        &mut u[offset..offset + sz]
    }

    // ------------------------------------------------------------------
    // Growth primitives.
    // ------------------------------------------------------------------

    /// Inserts `by` zero words at `offset`, shifting the tail right. In
    /// debug builds the shifted region is hashed before and after the
    /// move; a mismatch means the move itself is broken and nothing
    /// about the buffer can be trusted.
    pub(crate) fn scoot_right(&mut self, offset: usize, by: usize) {
        debug_assert_eq!(offset % 4, 0);
        debug_assert_eq!(by % 4, 0);
        let prev_len = self.b.len_u16();
        let pre = if cfg!(debug_assertions) {
            Some(region_hash(&self.b.u16s()[offset..prev_len]))
        } else {
            None
        };
        self.b.grow_to(prev_len + by);
        let u = self.b.u16s_mut();
        u.copy_within(offset..prev_len, offset + by);
        u[offset..offset + by].fill(0);
        if let Some(h) = pre {
            assert_eq!(
                region_hash(&self.b.u16s()[offset + by..prev_len + by]),
                h,
                "scoot_right corrupted the shifted region"
            );
        }
    }

    /// Removes `size` words at `offset`, shifting the tail left and
    /// shrinking the buffer. Only `cleanup` reclaims space.
    fn scoot_left(&mut self, offset: usize, size: usize) {
        debug_assert_eq!(offset % 4, 0);
        debug_assert_eq!(size % 4, 0);
        let len = self.b.len_u16();
        self.b.u16s_mut().copy_within(offset + size..len, offset);
        self.b.shrink_to(len - size);
    }

    /// Appends a zeroed container of `sz` words (rounded up to the
    /// buffer granularity) and stamps its size word. The new container
    /// defaults to array type with cardinality 0.
    pub(crate) fn new_container(&mut self, sz: usize) -> usize {
        let sz = round_up4(sz);
        let offset = self.b.len_u16();
        self.b.grow_to(offset + sz);
        self.b.u16s_mut()[offset + IDX_SIZE] = sz as u16;
        offset
    }

    /// Doubles an array container in place, or promotes it to bitmap
    /// form once doubling would cross [`PROMOTE_SIZE`].
    fn expand_container(&mut self, offset: usize) {
        let sz = self.b.u16s()[offset + IDX_SIZE] as usize;
        assert!(sz != 0, "container size must not be zero");
        let by = if sz >= PROMOTE_SIZE {
            MAX_CONTAINER_SIZE - sz
        } else {
            sz
        };
        // Open the gap beyond the container's right edge, then tell the
        // directory everything after us moved.
        self.scoot_right(offset + sz, by);
        keys::update_offsets(self.node_mut(), offset as u64, by as u64, true);

        if sz < PROMOTE_SIZE {
            self.b.u16s_mut()[offset + IDX_SIZE] = (2 * sz) as u16;
        } else {
            let mut buf = vec![0u16; MAX_CONTAINER_SIZE];
            array::to_bitmap(self.get_container(offset), &mut buf);
            self.b.u16s_mut()[offset..offset + MAX_CONTAINER_SIZE].copy_from_slice(&buf);
        }
    }

    /// Inserts `(key, offset)` into the directory. If that fills the
    /// directory it is doubled in place, which shifts every container
    /// right; the corrected offset is returned.
    pub(crate) fn set_key(&mut self, key: u64, offset: usize) -> usize {
        let node = self.node_mut();
        let added = keys::set(node, key, offset as u64);
        if !added || !keys::is_full(node) {
            return offset;
        }

        let cur = self.node_size_u16();
        let by = cur.min(MAX_NODE_GROW);
        self.scoot_right(cur, by);
        self.b.u64s_mut()[keys::IDX_NODE_SIZE] = (cur + by) as u64;

        // Every container moved right by `by` words.
        let node = self.node_mut();
        for i in 0..keys::num_keys(node) {
            let v = keys::val(node, i);
            if v > 0 {
                keys::set_val(node, i, v + by as u64);
            }
        }
        offset + by
    }

    /// Copies a produced container back over the one at `offset`,
    /// growing it in place along the step-size schedule when needed.
    pub(crate) fn copy_at(&mut self, offset: usize, src: &[u16]) {
        let dst_size = self.b.u16s()[offset + IDX_SIZE] as usize;
        assert!(dst_size != 0, "container size must not be zero");

        if src[IDX_TYPE] == TYPE_BITMAP {
            debug_assert_eq!(src.len(), MAX_CONTAINER_SIZE);
            if dst_size < MAX_CONTAINER_SIZE {
                let by = MAX_CONTAINER_SIZE - dst_size;
                self.scoot_right(offset + dst_size, by);
                keys::update_offsets(self.node_mut(), offset as u64, by as u64, true);
            }
            self.b.u16s_mut()[offset..offset + MAX_CONTAINER_SIZE].copy_from_slice(src);
            return;
        }

        if src.len() <= dst_size {
            let dst = &mut self.b.u16s_mut()[offset..offset + dst_size];
            dst[..src.len()].copy_from_slice(src);
            // Keep the physical size; the copy stamped the logical one.
            dst[IDX_SIZE] = dst_size as u16;
            return;
        }

        let target = step_size(src.len());
        let by = target - dst_size;
        self.scoot_right(offset + dst_size, by);
        keys::update_offsets(self.node_mut(), offset as u64, by as u64, true);
        if target == MAX_CONTAINER_SIZE {
            // The schedule tops out: store the array in bitmap form.
            let mut buf = vec![0u16; MAX_CONTAINER_SIZE];
            array::to_bitmap(src, &mut buf);
            self.b.u16s_mut()[offset..offset + MAX_CONTAINER_SIZE].copy_from_slice(&buf);
        } else {
            let dst = &mut self.b.u16s_mut()[offset..offset + target];
            dst[..src.len()].copy_from_slice(src);
            dst[IDX_SIZE] = target as u16;
        }
    }

    /// Appends a copy of `src` as the container for `key`.
    pub(crate) fn append_container(&mut self, key: u64, src: &[u16]) {
        let sz = round_up4(src.len());
        let off = self.new_container(sz);
        let dst = &mut self.b.u16s_mut()[off..off + sz];
        dst[..src.len()].copy_from_slice(src);
        dst[IDX_SIZE] = sz as u16;
        self.set_key(key, off);
    }

    // ------------------------------------------------------------------
    // Mutation.
    // ------------------------------------------------------------------

    /// Adds `x`. Returns true iff it was not already present.
    pub fn set(&mut self, x: u64) -> bool {
        let key = x & KEY_MASK;
        let (mut offset, found) = keys::get_value(self.node(), key);
        if !found {
            let o = self.new_container(MIN_CONTAINER_SIZE);
            offset = self.set_key(key, o) as u64;
        }
        let off = offset as usize;
        let c = self.get_container_mut(off);
        match c[IDX_TYPE] {
            TYPE_ARRAY => {
                if !array::add(c, low16(x)) {
                    return false;
                }
                if array::is_full(self.get_container(off)) {
                    self.expand_container(off);
                }
                true
            }
            TYPE_BITMAP => bitc::add(c, low16(x)),
            t => panic!("invalid container type {t}"),
        }
    }

    /// Adds every value in order.
    pub fn set_many(&mut self, values: &[u64]) {
        for &x in values {
            self.set(x);
        }
    }

    /// Removes `x`. Returns true iff it was present. Emptied containers
    /// stay in place until [`Bitmap::cleanup`] reclaims them.
    pub fn remove(&mut self, x: u64) -> bool {
        let (offset, found) = keys::get_value(self.node(), x & KEY_MASK);
        if !found {
            return false;
        }
        let c = self.get_container_mut(offset as usize);
        match c[IDX_TYPE] {
            TYPE_ARRAY => array::remove(c, low16(x)),
            TYPE_BITMAP => bitc::remove(c, low16(x)),
            t => panic!("invalid container type {t}"),
        }
    }

    /// Removes every value in `[lo, hi)`, then reclaims emptied
    /// containers.
    pub fn remove_range(&mut self, lo: u64, hi: u64) {
        assert!(lo <= hi, "remove_range requires lo <= hi");
        if lo == hi {
            return;
        }
        let k1 = lo & KEY_MASK;
        let k2 = hi & KEY_MASK;

        if k1 == k2 {
            if low16(hi) > 0 {
                self.remove_range_in(k1, low16(lo), low16(hi) - 1);
            }
            self.cleanup();
            return;
        }

        // Whole containers strictly between the end keys are zeroed in
        // place; cleanup below strips them and their entries.
        let mut middles = Vec::new();
        {
            let node = self.node();
            let num = keys::num_keys(node);
            let mut st = keys::search(node, k1);
            if st < num && keys::key(node, st) == k1 {
                st += 1;
            }
            for i in st..num {
                if keys::key(node, i) >= k2 {
                    break;
                }
                middles.push(keys::val(node, i) as usize);
            }
        }
        for off in middles {
            self.zero_out_container(off);
        }

        self.remove_range_in(k1, low16(lo), u16::MAX);
        if low16(hi) > 0 {
            self.remove_range_in(k2, 0, low16(hi) - 1);
        }
        self.cleanup();
    }

    /// Removes `[lo, hi]` (inclusive) from the container for `key`, if
    /// that container exists.
    fn remove_range_in(&mut self, key: u64, lo: u16, hi: u16) {
        let (off, found) = keys::get_value(self.node(), key);
        if !found {
            return;
        }
        let off = off as usize;
        if lo == 0 && hi == u16::MAX {
            self.zero_out_container(off);
            return;
        }
        let c = self.get_container_mut(off);
        match c[IDX_TYPE] {
            TYPE_ARRAY => array::remove_range(c, lo, hi),
            TYPE_BITMAP => bitc::remove_range(c, lo, hi),
            t => panic!("invalid container type {t}"),
        }
    }

    pub(crate) fn zero_out_container(&mut self, offset: usize) {
        let c = self.get_container_mut(offset);
        c[HEADER_WORDS..].fill(0);
        container::set_cardinality(c, 0);
    }

    /// Strips zero-cardinality containers (key 0's excepted) and their
    /// directory entries, left-shifting the buffer to close every gap.
    pub fn cleanup(&mut self) {
        let (mut cont_ivals, removed_entries) = {
            let node = self.node();
            let num = keys::num_keys(node);
            let mut ivals: Vec<(usize, usize)> = Vec::new();
            let mut ents: Vec<usize> = Vec::new();
            for i in 1..num {
                let off = keys::val(node, i) as usize;
                let c = self.get_container(off);
                if container::get_cardinality(c) == 0 {
                    ivals.push((off, off + c.len()));
                    ents.push(i);
                }
            }
            (ivals, ents)
        };
        if removed_entries.is_empty() {
            return;
        }
        tracing::trace!(
            containers = removed_entries.len(),
            "cleanup reclaiming empty containers"
        );

        // Close the container gaps right-to-left so the offsets of the
        // intervals still to process stay valid. Touching intervals are
        // merged into one move.
        cont_ivals.sort_unstable();
        let mut merged: Vec<(usize, usize)> = Vec::new();
        for (s, e) in cont_ivals {
            match merged.last_mut() {
                Some(last) if last.1 == s => last.1 = e,
                _ => merged.push((s, e)),
            }
        }
        for &(s, e) in merged.iter().rev() {
            self.scoot_left(s, e - s);
            keys::update_offsets(self.node_mut(), e as u64, (e - s) as u64, false);
        }

        // Compact the surviving directory entries over the dead ones.
        let node = self.node_mut();
        let num = keys::num_keys(node);
        let mut w = 1;
        let mut di = 0;
        for i in 1..num {
            if di < removed_entries.len() && removed_entries[di] == i {
                di += 1;
                continue;
            }
            if w != i {
                node[keys::key_offset(w)] = node[keys::key_offset(i)];
                node[keys::val_offset(w)] = node[keys::val_offset(i)];
            }
            w += 1;
        }
        let removed = num - w;
        for i in w..num {
            node[keys::key_offset(i)] = 0;
            node[keys::val_offset(i)] = 0;
        }
        keys::set_num_keys(node, w);

        // Return the freed directory capacity too, shifting every
        // container left in lockstep with the size field.
        let by = 8 * removed;
        let cur = self.node_size_u16();
        self.scoot_left(cur - by, by);
        self.b.u64s_mut()[keys::IDX_NODE_SIZE] = (cur - by) as u64;
        keys::update_offsets(self.node_mut(), cur as u64, by as u64, false);
    }

    /// Empties the bitmap, releasing its buffer back to the initial
    /// footprint.
    pub fn reset(&mut self) {
        *self = Bitmap::new();
    }

    // ------------------------------------------------------------------
    // Queries.
    // ------------------------------------------------------------------

    pub fn contains(&self, x: u64) -> bool {
        let (offset, found) = keys::get_value(self.node(), x & KEY_MASK);
        if !found {
            return false;
        }
        let c = self.get_container(offset as usize);
        match c[IDX_TYPE] {
            TYPE_ARRAY => array::has(c, low16(x)),
            TYPE_BITMAP => bitc::has(c, low16(x)),
            t => panic!("invalid container type {t}"),
        }
    }

    /// Number of values in the set.
    pub fn cardinality(&self) -> u64 {
        let node = self.node();
        let mut n = 0u64;
        for i in 0..keys::num_keys(node) {
            let c = self.get_container(keys::val(node, i) as usize);
            n += container::get_cardinality(c) as u64;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.cardinality() == 0
    }

    /// Smallest value, or 0 when empty.
    pub fn minimum(&self) -> u64 {
        let node = self.node();
        for i in 0..keys::num_keys(node) {
            let c = self.get_container(keys::val(node, i) as usize);
            if container::get_cardinality(c) == 0 {
                continue;
            }
            let lo = match c[IDX_TYPE] {
                TYPE_ARRAY => array::minimum(c),
                _ => bitc::minimum(c),
            };
            return keys::key(node, i) | lo as u64;
        }
        0
    }

    /// Largest value, or 0 when empty.
    pub fn maximum(&self) -> u64 {
        let node = self.node();
        for i in (0..keys::num_keys(node)).rev() {
            let c = self.get_container(keys::val(node, i) as usize);
            if container::get_cardinality(c) == 0 {
                continue;
            }
            let lo = match c[IDX_TYPE] {
                TYPE_ARRAY => array::maximum(c),
                _ => bitc::maximum(c),
            };
            return keys::key(node, i) | lo as u64;
        }
        0
    }

    /// The `k`-th smallest value, 0-indexed.
    pub fn select(&self, k: u64) -> Result<u64> {
        let cardinality = self.cardinality();
        if k >= cardinality {
            return Err(Error::OutOfBounds {
                index: k,
                cardinality,
            });
        }
        let node = self.node();
        let mut remaining = k;
        for i in 0..keys::num_keys(node) {
            let c = self.get_container(keys::val(node, i) as usize);
            let n = container::get_cardinality(c) as u64;
            if remaining < n {
                let lo = match c[IDX_TYPE] {
                    TYPE_ARRAY => c[HEADER_WORDS + remaining as usize],
                    _ => bitc::select_at(c, remaining as u32),
                };
                return Ok(keys::key(node, i) | lo as u64);
            }
            remaining -= n;
        }
        unreachable!("cardinality accounted for every container")
    }

    /// Number of values `<= x`, or `None` when `x` is absent; the
    /// inverse of [`Bitmap::select`]: `rank(select(i)) == i + 1`.
    pub fn rank(&self, x: u64) -> Option<u64> {
        let key = x & KEY_MASK;
        let node = self.node();
        let idx = keys::search(node, key);
        if idx >= keys::num_keys(node) || keys::key(node, idx) != key {
            return None;
        }
        let c = self.get_container(keys::val(node, idx) as usize);
        let lo = low16(x);
        let within = match c[IDX_TYPE] {
            TYPE_ARRAY => {
                let i = array::find(c, lo);
                if i >= container::get_cardinality(c) as usize || c[HEADER_WORDS + i] != lo {
                    return None;
                }
                (i + 1) as u64
            }
            TYPE_BITMAP => {
                if !bitc::has(c, lo) {
                    return None;
                }
                bitc::rank(c, lo) as u64
            }
            t => panic!("invalid container type {t}"),
        };
        let mut n = within;
        for i in 0..idx {
            n += container::get_cardinality(self.get_container(keys::val(node, i) as usize)) as u64;
        }
        Some(n)
    }

    /// All values in ascending order.
    pub fn to_vec(&self) -> Vec<u64> {
        self.iter().collect()
    }

    /// Forward cursor over the set in ascending order.
    pub fn iter(&self) -> BitmapIter<'_> {
        BitmapIter::new(self)
    }

    /// Splits the directory into `n` near-equal key slices so disjoint
    /// ranges can be read from separate threads.
    pub fn range_iters(&self, n: usize) -> Vec<BitmapIter<'_>> {
        BitmapIter::ranges(self, n)
    }

    // ------------------------------------------------------------------
    // Serialization.
    // ------------------------------------------------------------------

    /// The raw buffer. On little-endian targets this is the wire format
    /// byte-for-byte; no serialization pass exists or is needed.
    pub fn to_buffer(&self) -> &[u8] {
        self.b.bytes()
    }

    /// An owned copy of [`Bitmap::to_buffer`].
    pub fn to_buffer_copy(&self) -> Vec<u8> {
        self.b.bytes().to_vec()
    }

    /// A zero-copy, read-only view over a serialized bitmap. Malformed
    /// buffers yield an empty view.
    pub fn from_buffer(data: &[u8]) -> BitmapView<'_> {
        BitmapView::from_buffer(data)
    }

    /// An owned, fully mutable bitmap decoded from a serialized buffer.
    /// Malformed buffers yield an empty bitmap.
    pub fn from_buffer_copy(data: &[u8]) -> Bitmap {
        if !validate_buffer(data) {
            tracing::warn!(len = data.len(), "rejecting malformed bitmap buffer");
            return Bitmap::new();
        }
        let mut b = Buffer::with_u64_len(data.len() / 8);
        for (w, chunk) in b.u16s_mut().iter_mut().zip(data.chunks_exact(2)) {
            *w = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Bitmap { b }
    }

    /// Partitions the set into consecutive pieces, cutting whenever the
    /// accumulated cost (container bytes plus `size_fn(start, end)` for
    /// the key range each container covers) would exceed `max_sz`.
    pub fn split<F>(&self, size_fn: F, max_sz: u64) -> Vec<Bitmap>
    where
        F: Fn(u64, u64) -> u64,
    {
        let node = self.node();
        let num = keys::num_keys(node);
        let mut pieces = Vec::new();
        let mut cur = Bitmap::new();
        let mut acc = 0u64;
        for i in 0..num {
            let c = self.get_container(keys::val(node, i) as usize);
            if container::get_cardinality(c) == 0 {
                continue;
            }
            let key = keys::key(node, i);
            let cost = 2 * c.len() as u64 + size_fn(key, key | 0xFFFF);
            if acc > 0 && acc + cost > max_sz {
                pieces.push(std::mem::replace(&mut cur, Bitmap::new()));
                acc = 0;
            }
            acc += cost;
            cur.append_container(key, c);
        }
        pieces.push(cur);
        pieces
    }
}

/// Growth schedule for array containers rebuilt by `copy_at`: the
/// smallest power of two in 128..=2048 holding `n` words, else a full
/// bitmap container.
fn step_size(n: usize) -> usize {
    for shift in 7..=11 {
        if (1 << shift) >= n {
            return 1 << shift;
        }
    }
    MAX_CONTAINER_SIZE
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Bitmap {
    fn clone(&self) -> Self {
        Bitmap { b: self.b.clone() }
    }
}

impl PartialEq for Bitmap {
    fn eq(&self, other: &Self) -> bool {
        self.cardinality() == other.cardinality() && self.iter().eq(other.iter())
    }
}

impl Eq for Bitmap {}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bitmap[cardinality={}]", self.cardinality())?;
        let node = self.node();
        for i in 0..keys::num_keys(node) {
            let off = keys::val(node, i) as usize;
            let c = self.get_container(off);
            writeln!(
                f,
                "  [{i}] key {:#x}: offset {off} size {} type {} card {}",
                keys::key(node, i),
                c[IDX_SIZE],
                c[IDX_TYPE],
                container::get_cardinality(c),
            )?;
        }
        Ok(())
    }
}
