//! Ordered, lazy concatenation of per-source entry sequences.
//!
//! Source 1's entries all come before source 2's, and so on. Nothing is
//! sorted or interleaved. Only the current sequence is pulled from; the next
//! one is opened once the current one is exhausted, so if a sequence never
//! ends, later ones are never reached.

use std::iter::FusedIterator;

/// Iterator returned by [`merge`].
pub struct Merge<S>
where
    S: Iterator,
    S::Item: Iterator,
{
    sequences: S,
    current: Option<S::Item>,
    exhausted: bool,
}

/// Concatenates `sequences` in the order they are listed.
///
/// `sequences` is itself pulled lazily, which lets callers defer opening a
/// source (and any I/O that implies) until the merge reaches it.
pub fn merge<I>(sequences: I) -> Merge<I::IntoIter>
where
    I: IntoIterator,
    I::Item: Iterator,
{
    Merge {
        sequences: sequences.into_iter(),
        current: None,
        exhausted: false,
    }
}

impl<S> Iterator for Merge<S>
where
    S: Iterator,
    S::Item: Iterator,
{
    type Item = <S::Item as Iterator>::Item;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.exhausted {
                return None;
            }
            if let Some(current) = self.current.as_mut() {
                if let Some(item) = current.next() {
                    return Some(item);
                }
                self.current = None;
            }
            match self.sequences.next() {
                Some(next) => self.current = Some(next),
                None => self.exhausted = true,
            }
        }
    }
}

impl<S> FusedIterator for Merge<S>
where
    S: Iterator,
    S::Item: Iterator,
{
}
