//! Reader transformers.
//!
//! Every combinator follows the same lifecycle as a primitive reader: it
//! becomes spent after returning `Done` or `Error`, answers
//! [`DecodeError::NotReset`] until [`Reader::reset`] is called, and resets
//! every reader it owns.

use bytes::Buf;

use super::{ProcessStatus, Reader};
use crate::DecodeError;

/// See [`Reader::flat_map`].
pub struct FlatMap<R, F, N> {
    head: R,
    select: F,
    tail: Option<N>,
    spent: bool,
}

impl<R, F, N> FlatMap<R, F, N> {
    pub(crate) fn new(head: R, select: F) -> Self {
        Self { head, select, tail: None, spent: false }
    }
}

impl<R, F, N> Reader for FlatMap<R, F, N>
where
    R: Reader,
    F: FnMut(R::Output) -> N,
    N: Reader,
{
    type Output = N::Output;

    fn process(&mut self, src: &mut dyn Buf) -> ProcessStatus<Self::Output> {
        if self.spent {
            return ProcessStatus::Error(DecodeError::NotReset);
        }

        if self.tail.is_none() {
            match self.head.process(src) {
                ProcessStatus::Done(value) => self.tail = Some((self.select)(value)),
                ProcessStatus::Refill => return ProcessStatus::Refill,
                ProcessStatus::Error(e) => {
                    self.spent = true;
                    return ProcessStatus::Error(e);
                },
            }
        }

        let status = match self.tail.as_mut() {
            Some(tail) => tail.process(src),
            None => ProcessStatus::Error(DecodeError::NotReset),
        };
        self.spent = status.is_terminal();
        status
    }

    fn reset(&mut self) {
        self.head.reset();
        self.tail = None;
        self.spent = false;
    }
}

/// See [`Reader::then`].
pub struct Then<A: Reader, B> {
    first: A,
    second: B,
    held: Option<A::Output>,
    spent: bool,
}

impl<A: Reader, B> Then<A, B> {
    pub(crate) fn new(first: A, second: B) -> Self {
        Self { first, second, held: None, spent: false }
    }
}

impl<A, B> Reader for Then<A, B>
where
    A: Reader,
    B: Reader,
{
    type Output = (A::Output, B::Output);

    fn process(&mut self, src: &mut dyn Buf) -> ProcessStatus<Self::Output> {
        if self.spent {
            return ProcessStatus::Error(DecodeError::NotReset);
        }

        if self.held.is_none() {
            match self.first.process(src) {
                ProcessStatus::Done(value) => self.held = Some(value),
                ProcessStatus::Refill => return ProcessStatus::Refill,
                ProcessStatus::Error(e) => {
                    self.spent = true;
                    return ProcessStatus::Error(e);
                },
            }
        }

        match self.second.process(src) {
            ProcessStatus::Refill => ProcessStatus::Refill,
            ProcessStatus::Error(e) => {
                self.spent = true;
                ProcessStatus::Error(e)
            },
            ProcessStatus::Done(second) => {
                self.spent = true;
                match self.held.take() {
                    Some(first) => ProcessStatus::Done((first, second)),
                    None => ProcessStatus::Error(DecodeError::NotReset),
                }
            },
        }
    }

    fn reset(&mut self) {
        self.first.reset();
        self.second.reset();
        self.held = None;
        self.spent = false;
    }
}

/// See [`Reader::finally`].
pub struct Finally<R, F> {
    inner: R,
    f: F,
}

impl<R, F> Finally<R, F> {
    pub(crate) fn new(inner: R, f: F) -> Self {
        Self { inner, f }
    }
}

impl<R, F, U> Reader for Finally<R, F>
where
    R: Reader,
    F: FnMut(R::Output) -> U,
{
    type Output = U;

    fn process(&mut self, src: &mut dyn Buf) -> ProcessStatus<U> {
        self.inner.process(src).map(&mut self.f)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// See [`Reader::try_finally`].
pub struct TryFinally<R, F> {
    inner: R,
    f: F,
}

impl<R, F> TryFinally<R, F> {
    pub(crate) fn new(inner: R, f: F) -> Self {
        Self { inner, f }
    }
}

impl<R, F, U> Reader for TryFinally<R, F>
where
    R: Reader,
    F: FnMut(R::Output) -> Result<U, DecodeError>,
{
    type Output = U;

    fn process(&mut self, src: &mut dyn Buf) -> ProcessStatus<U> {
        match self.inner.process(src) {
            ProcessStatus::Done(value) => match (self.f)(value) {
                Ok(value) => ProcessStatus::Done(value),
                Err(e) => ProcessStatus::Error(e),
            },
            ProcessStatus::Refill => ProcessStatus::Refill,
            ProcessStatus::Error(e) => ProcessStatus::Error(e),
        }
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// See [`Reader::repeat`].
pub struct Repeat<R, N, C> {
    item: R,
    count: N,
    max: usize,
    remaining: Option<usize>,
    collected: C,
    spent: bool,
}

impl<R, N, C: Default> Repeat<R, N, C> {
    pub(crate) fn new(item: R, count: N, max: usize) -> Self {
        Self { item, count, max, remaining: None, collected: C::default(), spent: false }
    }

    fn fail<T>(&mut self, error: DecodeError) -> ProcessStatus<T> {
        self.spent = true;
        ProcessStatus::Error(error)
    }
}

impl<R, N, C> Reader for Repeat<R, N, C>
where
    R: Reader,
    N: Reader<Output = i32>,
    C: Default + Extend<R::Output>,
{
    type Output = C;

    fn process(&mut self, src: &mut dyn Buf) -> ProcessStatus<C> {
        if self.spent {
            return ProcessStatus::Error(DecodeError::NotReset);
        }

        let mut left = match self.remaining {
            Some(left) => left,
            None => match self.count.process(src) {
                ProcessStatus::Done(count) => {
                    let Ok(count) = usize::try_from(count) else {
                        return self.fail(DecodeError::NegativeLength(count));
                    };
                    if count > self.max {
                        return self.fail(DecodeError::TooManyElements { count, max: self.max });
                    }
                    count
                },
                ProcessStatus::Refill => return ProcessStatus::Refill,
                ProcessStatus::Error(e) => return self.fail(e),
            },
        };

        while left > 0 {
            match self.item.process(src) {
                ProcessStatus::Done(value) => {
                    self.collected.extend(std::iter::once(value));
                    self.item.reset();
                    left -= 1;
                },
                ProcessStatus::Refill => {
                    self.remaining = Some(left);
                    return ProcessStatus::Refill;
                },
                ProcessStatus::Error(e) => return self.fail(e),
            }
        }

        self.remaining = None;
        self.spent = true;
        ProcessStatus::Done(std::mem::take(&mut self.collected))
    }

    fn reset(&mut self) {
        self.count.reset();
        self.item.reset();
        self.remaining = None;
        self.collected = C::default();
        self.spent = false;
    }
}
