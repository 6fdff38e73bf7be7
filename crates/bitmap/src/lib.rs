//! Stateless bit operations over arrays of machine words.
//!
//! A bitmap is any slice of `usize` words. Bit `i` lives in word
//! `i / BITS_PER_WORD` at bit offset `i % BITS_PER_WORD`. The functions in
//! this crate never allocate and never fail; passing a position outside the
//! bitmap is a caller bug and panics on the slice index.
//!
//! The scanning functions return [`not_found`] (`bitmap.len() *
//! BITS_PER_WORD`) when no matching bit exists, which makes "found" checks
//! a simple `<` comparison against the number of bits the caller cares
//! about.
//!
//! # Examples
//!
//! ```
//! let mut map = [0_usize; 2];
//!
//! bitmap::set(&mut map, 3);
//! bitmap::set(&mut map, 70);
//! assert!(bitmap::is_set(&map, 70));
//! assert_eq!(bitmap::first_set(&map), 3);
//! assert_eq!(bitmap::first_clear(&map), 0);
//!
//! bitmap::clear(&mut map, 3);
//! assert_eq!(bitmap::first_set(&map), 70);
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

/// Number of bits held by one bitmap word.
pub const BITS_PER_WORD: usize = usize::BITS as usize;

/// Returns the number of words needed to hold `bits` bits.
#[must_use]
pub const fn words_for(bits: usize) -> usize {
    bits.div_ceil(BITS_PER_WORD)
}

/// Returns the value the scanning functions report when nothing matches.
#[must_use]
pub const fn not_found(bitmap: &[usize]) -> usize {
    bitmap.len() * BITS_PER_WORD
}

const fn split(pos: usize) -> (usize, usize) {
    (pos / BITS_PER_WORD, pos % BITS_PER_WORD)
}

/// Sets bit `pos`.
///
/// # Panics
///
/// Panics if `pos` is outside the bitmap.
pub fn set(bitmap: &mut [usize], pos: usize) {
    let (word, bit) = split(pos);
    bitmap[word] |= 1 << bit;
}

/// Clears bit `pos`.
///
/// # Panics
///
/// Panics if `pos` is outside the bitmap.
pub fn clear(bitmap: &mut [usize], pos: usize) {
    let (word, bit) = split(pos);
    bitmap[word] &= !(1 << bit);
}

/// Returns `true` if bit `pos` is set.
///
/// # Panics
///
/// Panics if `pos` is outside the bitmap.
#[must_use]
pub fn is_set(bitmap: &[usize], pos: usize) -> bool {
    let (word, bit) = split(pos);
    bitmap[word] & (1 << bit) != 0
}

/// Returns the position of the lowest set bit, or [`not_found`] if every
/// bit is clear.
#[must_use]
pub fn first_set(bitmap: &[usize]) -> usize {
    bitmap
        .iter()
        .enumerate()
        .find(|(_, word)| **word != 0)
        .map_or_else(|| not_found(bitmap), |(i, word)| {
            i * BITS_PER_WORD + word.trailing_zeros() as usize
        })
}

/// Returns the position of the lowest clear bit, or [`not_found`] if every
/// bit is set.
#[must_use]
pub fn first_clear(bitmap: &[usize]) -> usize {
    bitmap
        .iter()
        .enumerate()
        .find(|(_, word)| **word != usize::MAX)
        .map_or_else(|| not_found(bitmap), |(i, word)| {
            i * BITS_PER_WORD + word.trailing_ones() as usize
        })
}

/// Calls `f` with the position of every set bit, in ascending order.
///
/// Any state the callback needs is carried by the closure itself.
pub fn for_each_set<F>(bitmap: &[usize], mut f: F)
where
    F: FnMut(usize),
{
    for (i, &word) in bitmap.iter().enumerate() {
        let mut rest = word;
        while rest != 0 {
            let bit = rest.trailing_zeros() as usize;
            f(i * BITS_PER_WORD + bit);
            rest &= rest - 1;
        }
    }
}

/// Calls `f` with the position of every clear bit, in ascending order.
pub fn for_each_clear<F>(bitmap: &[usize], mut f: F)
where
    F: FnMut(usize),
{
    for (i, &word) in bitmap.iter().enumerate() {
        let mut rest = !word;
        while rest != 0 {
            let bit = rest.trailing_zeros() as usize;
            f(i * BITS_PER_WORD + bit);
            rest &= rest - 1;
        }
    }
}
