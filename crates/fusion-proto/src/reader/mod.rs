//! Incremental readers.
//!
//! A [`Reader`] consumes bytes from the front of a buffer and reports one of
//! three outcomes through [`ProcessStatus`]:
//!
//! - `Done(value)`: a complete value was decoded. The reader is now spent and
//!   must be [`reset`](Reader::reset) before it is used again.
//! - `Refill`: every available byte was consumed and more are needed. Call
//!   `process` again with the continuation of the same stream.
//! - `Error(e)`: the input is malformed. The stream cannot be resynchronised;
//!   the caller must drop the connection.
//!
//! Readers never panic on input and never look past the bytes they need, so
//! several frames queued in one buffer decode one after the other.
//!
//! # Composition
//!
//! Compound decoders are built from [`primitives`] with the combinator
//! methods on [`Reader`]. Each combinator is a small state object holding the
//! values decoded so far and which step it is on; the partial-input handling
//! of a frame decoder is entirely inherited from its parts.
//!
//! ```
//! use bytes::Bytes;
//! use fusion_proto::reader::{primitives::{i32_reader, StringReader}, ProcessStatus, Reader};
//!
//! let mut reader = StringReader::new(16).then(i32_reader());
//! let mut first = Bytes::from_static(&[0, 0, 0, 2, b'h']);
//! assert_eq!(reader.process(&mut first), ProcessStatus::Refill);
//!
//! let mut rest = Bytes::from_static(&[b'i', 0, 0, 0, 7]);
//! assert_eq!(reader.process(&mut rest), ProcessStatus::Done(("hi".to_string(), 7)));
//! ```

use bytes::Buf;

use crate::DecodeError;

pub mod combinators;
pub mod primitives;

pub use combinators::{FlatMap, Finally, Repeat, Then, TryFinally};

/// Outcome of one [`Reader::process`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus<T> {
    /// A value is complete
    Done(T),
    /// Input exhausted before the value was complete
    Refill,
    /// Input is malformed
    Error(DecodeError),
}

impl<T> ProcessStatus<T> {
    /// Transform the completed value, leaving `Refill` and `Error` untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ProcessStatus<U> {
        match self {
            Self::Done(value) => ProcessStatus::Done(f(value)),
            Self::Refill => ProcessStatus::Refill,
            Self::Error(e) => ProcessStatus::Error(e),
        }
    }

    /// Returns true unless the status is `Refill`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Refill)
    }
}

/// Type-erased reader, used where the next decoder is chosen at runtime.
pub type BoxReader<T> = Box<dyn Reader<Output = T> + Send>;

/// An incremental decoder for one value of type [`Reader::Output`].
pub trait Reader {
    /// Decoded value
    type Output;

    /// Consume bytes from `src` until a value is complete or `src` is empty.
    fn process(&mut self, src: &mut dyn Buf) -> ProcessStatus<Self::Output>;

    /// Forget all partial state so the reader can decode a new value.
    fn reset(&mut self);

    /// Read a value, then continue with the reader `select` builds from it.
    ///
    /// This is how opcode dispatch works: the opcode byte picks the frame
    /// decoder that reads the rest of the message.
    fn flat_map<N, F>(self, select: F) -> FlatMap<Self, F, N>
    where
        Self: Sized,
        F: FnMut(Self::Output) -> N,
        N: Reader,
    {
        FlatMap::new(self, select)
    }

    /// Read a value, then read another with `next`, yielding both.
    fn then<B>(self, next: B) -> Then<Self, B>
    where
        Self: Sized,
        B: Reader,
    {
        Then::new(self, next)
    }

    /// Transform the decoded value with a pure function.
    fn finally<U, F>(self, f: F) -> Finally<Self, F>
    where
        Self: Sized,
        F: FnMut(Self::Output) -> U,
    {
        Finally::new(self, f)
    }

    /// Transform the decoded value, failing the decode if `f` rejects it.
    fn try_finally<U, F>(self, f: F) -> TryFinally<Self, F>
    where
        Self: Sized,
        F: FnMut(Self::Output) -> Result<U, DecodeError>,
    {
        TryFinally::new(self, f)
    }

    /// Read an element count with `count`, then that many values with `self`,
    /// collected into `C`.
    ///
    /// Counts that are negative or above `max` are rejected before any element
    /// is read.
    fn repeat<N, C>(self, count: N, max: usize) -> Repeat<Self, N, C>
    where
        Self: Sized,
        N: Reader<Output = i32>,
        C: Default + Extend<Self::Output>,
    {
        Repeat::new(self, count, max)
    }

    /// Erase the reader's type.
    fn boxed(self) -> BoxReader<Self::Output>
    where
        Self: Sized + Send + 'static,
    {
        Box::new(self)
    }
}

impl<R: Reader + ?Sized> Reader for Box<R> {
    type Output = R::Output;

    fn process(&mut self, src: &mut dyn Buf) -> ProcessStatus<Self::Output> {
        (**self).process(src)
    }

    fn reset(&mut self) {
        (**self).reset();
    }
}
