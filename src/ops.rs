//! Set operations: pairwise AND/OR/AND-NOT in both fresh and in-place
//! forms, and the fast multi-way combinators.
//!
//! The fresh forms walk both directories in key order and emit result
//! containers into a new bitmap. The in-place forms rewrite the left
//! operand container by container through `copy_at`. `fast_or` builds
//! its destination before merging anything: directory first, then
//! fixed-size bitmap containers, then tightly sized arrays, so the lazy
//! OR passes never shift the buffer more than they must.

use std::cmp::Ordering;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Sub, SubAssign};

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::container::{
    self, HEADER_WORDS, IDX_TYPE, INVALID_CARDINALITY, MAX_CONTAINER_SIZE, MIN_CONTAINER_SIZE,
    RUN_INLINE, RUN_LAZY, TYPE_BITMAP,
};
use crate::keys;
use crate::Bitmap;

impl Bitmap {
    /// Intersects `other` into `self`, container by container.
    pub fn and_with(&mut self, other: &Bitmap) {
        let an = self.num_keys();
        let bn = other.num_keys();
        let mut buf = vec![0u16; MAX_CONTAINER_SIZE];
        let (mut ai, mut bi) = (0, 0);
        while ai < an && bi < bn {
            match self.entry_key(ai).cmp(&other.entry_key(bi)) {
                Ordering::Equal => {
                    let a_off = self.entry_val(ai);
                    let out = container::and(
                        self.get_container(a_off),
                        other.get_container(other.entry_val(bi)),
                        &mut buf,
                    );
                    self.copy_at(a_off, out);
                    ai += 1;
                    bi += 1;
                }
                Ordering::Less => {
                    let off = self.entry_val(ai);
                    self.zero_out_container(off);
                    ai += 1;
                }
                Ordering::Greater => bi += 1,
            }
        }
        while ai < an {
            let off = self.entry_val(ai);
            self.zero_out_container(off);
            ai += 1;
        }
        self.cleanup();
    }

    /// Removes every value of `other` from `self`.
    pub fn and_not_with(&mut self, other: &Bitmap) {
        let an = self.num_keys();
        let bn = other.num_keys();
        let mut buf = vec![0u16; MAX_CONTAINER_SIZE];
        let (mut ai, mut bi) = (0, 0);
        while ai < an && bi < bn {
            match self.entry_key(ai).cmp(&other.entry_key(bi)) {
                Ordering::Equal => {
                    let a_off = self.entry_val(ai);
                    let out = container::and_not(
                        self.get_container(a_off),
                        other.get_container(other.entry_val(bi)),
                        &mut buf,
                    );
                    self.copy_at(a_off, out);
                    ai += 1;
                    bi += 1;
                }
                Ordering::Less => ai += 1,
                Ordering::Greater => bi += 1,
            }
        }
        self.cleanup();
    }

    /// Unions `other` into `self`.
    pub fn or_with(&mut self, other: &Bitmap) {
        let mut buf = vec![0u16; MAX_CONTAINER_SIZE];
        self.or_with_mode(other, 0, &mut buf);
    }

    /// Union pass with a run mode. With `RUN_LAZY`, touched bitmap
    /// containers are stamped with the invalid cardinality sentinel and
    /// must be repaired before the bitmap is read.
    pub(crate) fn or_with_mode(&mut self, other: &Bitmap, mode: u8, buf: &mut [u16]) {
        for i in 0..other.num_keys() {
            let src = other.get_container(other.entry_val(i));
            if container::get_cardinality(src) == 0 {
                continue;
            }
            let key = other.entry_key(i);
            let (dst_off, found) = keys::get_value(self.node(), key);
            if !found {
                self.append_container(key, src);
                continue;
            }
            let dst_off = dst_off as usize;
            if self.get_container(dst_off)[IDX_TYPE] == TYPE_BITMAP {
                // A bitmap destination absorbs any source in place.
                container::or_inline(
                    self.get_container_mut(dst_off),
                    src,
                    mode & RUN_LAZY != 0,
                );
            } else {
                let out = container::or(self.get_container(dst_off), src, buf, mode & !RUN_INLINE);
                self.copy_at(dst_off, out);
            }
        }
    }
}

/// Copies a non-empty container of `src` into `res` under its key.
fn append_nonempty(res: &mut Bitmap, src: &Bitmap, i: usize) {
    let c = src.get_container(src.entry_val(i));
    if container::get_cardinality(c) > 0 {
        res.append_container(src.entry_key(i), c);
    }
}

/// Intersection of two bitmaps as a fresh bitmap.
pub fn and(a: &Bitmap, b: &Bitmap) -> Bitmap {
    let mut res = Bitmap::new();
    let mut buf = vec![0u16; MAX_CONTAINER_SIZE];
    let (an, bn) = (a.num_keys(), b.num_keys());
    let (mut ai, mut bi) = (0, 0);
    while ai < an && bi < bn {
        match a.entry_key(ai).cmp(&b.entry_key(bi)) {
            Ordering::Equal => {
                let out = container::and(
                    a.get_container(a.entry_val(ai)),
                    b.get_container(b.entry_val(bi)),
                    &mut buf,
                );
                if container::get_cardinality(out) > 0 {
                    res.append_container(a.entry_key(ai), out);
                }
                ai += 1;
                bi += 1;
            }
            Ordering::Less => ai += 1,
            Ordering::Greater => bi += 1,
        }
    }
    res
}

/// Union of two bitmaps as a fresh bitmap.
pub fn or(a: &Bitmap, b: &Bitmap) -> Bitmap {
    let mut res = Bitmap::new();
    let mut buf = vec![0u16; MAX_CONTAINER_SIZE];
    let (an, bn) = (a.num_keys(), b.num_keys());
    let (mut ai, mut bi) = (0, 0);
    while ai < an && bi < bn {
        match a.entry_key(ai).cmp(&b.entry_key(bi)) {
            Ordering::Equal => {
                let out = container::or(
                    a.get_container(a.entry_val(ai)),
                    b.get_container(b.entry_val(bi)),
                    &mut buf,
                    0,
                );
                if container::get_cardinality(out) > 0 {
                    res.append_container(a.entry_key(ai), out);
                }
                ai += 1;
                bi += 1;
            }
            Ordering::Less => {
                append_nonempty(&mut res, a, ai);
                ai += 1;
            }
            Ordering::Greater => {
                append_nonempty(&mut res, b, bi);
                bi += 1;
            }
        }
    }
    while ai < an {
        append_nonempty(&mut res, a, ai);
        ai += 1;
    }
    while bi < bn {
        append_nonempty(&mut res, b, bi);
        bi += 1;
    }
    res
}

/// Difference `a \ b` as a fresh bitmap.
pub fn and_not(a: &Bitmap, b: &Bitmap) -> Bitmap {
    let mut res = Bitmap::new();
    let mut buf = vec![0u16; MAX_CONTAINER_SIZE];
    let (an, bn) = (a.num_keys(), b.num_keys());
    let (mut ai, mut bi) = (0, 0);
    while ai < an && bi < bn {
        match a.entry_key(ai).cmp(&b.entry_key(bi)) {
            Ordering::Equal => {
                let out = container::and_not(
                    a.get_container(a.entry_val(ai)),
                    b.get_container(b.entry_val(bi)),
                    &mut buf,
                );
                if container::get_cardinality(out) > 0 {
                    res.append_container(a.entry_key(ai), out);
                }
                ai += 1;
                bi += 1;
            }
            Ordering::Less => {
                append_nonempty(&mut res, a, ai);
                ai += 1;
            }
            Ordering::Greater => bi += 1,
        }
    }
    while ai < an {
        append_nonempty(&mut res, a, ai);
        ai += 1;
    }
    res
}

/// Multi-way intersection: a pairwise in-place fold.
pub fn fast_and(bitmaps: &[&Bitmap]) -> Bitmap {
    let Some((first, rest)) = bitmaps.split_first() else {
        return Bitmap::new();
    };
    let mut res = (*first).clone();
    for bm in rest {
        res.and_with(bm);
    }
    res
}

/// Multi-way union that sizes its destination up front.
///
/// Summing per-key cardinalities over the inputs bounds every result
/// container, so the destination directory and all its containers can
/// be created before any merging starts: keys first (the directory is
/// the leftmost region and must not grow mid-build), then fixed-size
/// bitmap containers, then estimate-sized arrays. The merge itself is a
/// sequence of lazy OR passes; a final sweep recounts every container
/// the passes stamped with the invalid sentinel.
pub fn fast_or(bitmaps: &[&Bitmap]) -> Bitmap {
    if bitmaps.is_empty() {
        return Bitmap::new();
    }
    if bitmaps.len() == 1 {
        return bitmaps[0].clone();
    }

    let mut est: FxHashMap<u64, u64> = FxHashMap::default();
    for bm in bitmaps {
        for i in 0..bm.num_keys() {
            let card = container::get_cardinality(bm.get_container(bm.entry_val(i)));
            if card > 0 {
                *est.entry(bm.entry_key(i)).or_insert(0) += card as u64;
            }
        }
    }
    let mut by_key: Vec<(u64, u64)> = est.into_iter().collect();
    by_key.sort_unstable();

    let mut res = Bitmap::with_capacity(by_key.len() + 2);
    for &(k, _) in &by_key {
        res.set_key(k, 0);
    }
    for &(k, card) in &by_key {
        if card >= 4096 {
            let off = res.new_container(MAX_CONTAINER_SIZE);
            res.get_container_mut(off)[IDX_TYPE] = TYPE_BITMAP;
            res.set_key(k, off);
        }
    }
    for &(k, card) in &by_key {
        if card < 4096 {
            let sz = (card as usize + HEADER_WORDS).max(MIN_CONTAINER_SIZE);
            let off = res.new_container(sz);
            res.set_key(k, off);
        }
    }

    let mut buf = vec![0u16; MAX_CONTAINER_SIZE];
    for bm in bitmaps {
        res.or_with_mode(bm, RUN_LAZY, &mut buf);
    }

    for i in 0..res.num_keys() {
        let off = res.entry_val(i);
        let c = res.get_container_mut(off);
        if container::get_cardinality(c) == INVALID_CARDINALITY {
            container::repair_cardinality(c);
        }
    }
    res
}

/// Parallel multi-way union: `fast_or` per group of inputs, then a
/// final fold. Each worker owns its group's output exclusively; inputs
/// are only read.
pub fn fast_par_or(n_workers: usize, bitmaps: &[&Bitmap]) -> Bitmap {
    if bitmaps.len() <= 1 {
        return fast_or(bitmaps);
    }
    let width = (bitmaps.len() / n_workers.max(1)).max(3);
    let partials: Vec<Bitmap> = bitmaps.par_chunks(width).map(fast_or).collect();
    let refs: Vec<&Bitmap> = partials.iter().collect();
    fast_or(&refs)
}

impl BitAndAssign<&Bitmap> for Bitmap {
    fn bitand_assign(&mut self, rhs: &Bitmap) {
        self.and_with(rhs);
    }
}

impl BitOrAssign<&Bitmap> for Bitmap {
    fn bitor_assign(&mut self, rhs: &Bitmap) {
        self.or_with(rhs);
    }
}

impl SubAssign<&Bitmap> for Bitmap {
    fn sub_assign(&mut self, rhs: &Bitmap) {
        self.and_not_with(rhs);
    }
}

impl BitAnd for &Bitmap {
    type Output = Bitmap;

    fn bitand(self, rhs: &Bitmap) -> Bitmap {
        and(self, rhs)
    }
}

impl BitOr for &Bitmap {
    type Output = Bitmap;

    fn bitor(self, rhs: &Bitmap) -> Bitmap {
        or(self, rhs)
    }
}

impl Sub for &Bitmap {
    type Output = Bitmap;

    fn sub(self, rhs: &Bitmap) -> Bitmap {
        and_not(self, rhs)
    }
}

impl FromIterator<u64> for Bitmap {
    fn from_iter<T: IntoIterator<Item = u64>>(iter: T) -> Self {
        let mut bm = Bitmap::new();
        bm.extend(iter);
        bm
    }
}

impl Extend<u64> for Bitmap {
    fn extend<T: IntoIterator<Item = u64>>(&mut self, iter: T) {
        for x in iter {
            self.set(x);
        }
    }
}
