//! Primitive readers: fixed-width integers, length-prefixed bytes and
//! strings, socket addresses.

use std::{
    marker::PhantomData,
    net::{IpAddr, SocketAddr},
};

use bytes::{Buf, Bytes};

use super::{BoxReader, Finally, ProcessStatus, Reader};
use crate::DecodeError;

/// Reads exactly `N` raw bytes.
#[derive(Debug, Clone)]
pub struct Fixed<const N: usize> {
    buf: [u8; N],
    filled: usize,
    spent: bool,
}

impl<const N: usize> Fixed<N> {
    /// Create a reader for `N` bytes
    #[must_use]
    pub fn new() -> Self {
        Self { buf: [0; N], filled: 0, spent: false }
    }
}

impl<const N: usize> Default for Fixed<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Reader for Fixed<N> {
    type Output = [u8; N];

    fn process(&mut self, src: &mut dyn Buf) -> ProcessStatus<[u8; N]> {
        if self.spent {
            return ProcessStatus::Error(DecodeError::NotReset);
        }

        let take = (N - self.filled).min(src.remaining());
        src.copy_to_slice(&mut self.buf[self.filled..self.filled + take]);
        self.filled += take;
        if self.filled < N {
            return ProcessStatus::Refill;
        }

        self.spent = true;
        ProcessStatus::Done(self.buf)
    }

    fn reset(&mut self) {
        self.filled = 0;
        self.spent = false;
    }
}

/// Reads one byte.
pub type U8Reader = Finally<Fixed<1>, fn([u8; 1]) -> u8>;
/// Reads a big-endian `i32`.
pub type I32Reader = Finally<Fixed<4>, fn([u8; 4]) -> i32>;
/// Reads a big-endian `i64`.
pub type I64Reader = Finally<Fixed<8>, fn([u8; 8]) -> i64>;

/// Create a [`U8Reader`].
#[must_use]
pub fn u8_reader() -> U8Reader {
    Fixed::new().finally(u8::from_be_bytes as fn([u8; 1]) -> u8)
}

/// Create an [`I32Reader`].
#[must_use]
pub fn i32_reader() -> I32Reader {
    Fixed::new().finally(i32::from_be_bytes as fn([u8; 4]) -> i32)
}

/// Create an [`I64Reader`].
#[must_use]
pub fn i64_reader() -> I64Reader {
    Fixed::new().finally(i64::from_be_bytes as fn([u8; 8]) -> i64)
}

/// Reads an `i32` length followed by that many raw bytes.
///
/// The length is checked against `max` before the payload buffer is
/// allocated.
pub struct LengthPrefixed {
    max: usize,
    len: I32Reader,
    expected: Option<usize>,
    data: Vec<u8>,
    spent: bool,
}

impl LengthPrefixed {
    /// Create a reader accepting at most `max` payload bytes
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self { max, len: i32_reader(), expected: None, data: Vec::new(), spent: false }
    }

    fn fail<T>(&mut self, error: DecodeError) -> ProcessStatus<T> {
        self.spent = true;
        ProcessStatus::Error(error)
    }
}

impl Reader for LengthPrefixed {
    type Output = Vec<u8>;

    fn process(&mut self, src: &mut dyn Buf) -> ProcessStatus<Vec<u8>> {
        if self.spent {
            return ProcessStatus::Error(DecodeError::NotReset);
        }

        let expected = match self.expected {
            Some(expected) => expected,
            None => match self.len.process(src) {
                ProcessStatus::Done(len) => {
                    let Ok(len) = usize::try_from(len) else {
                        return self.fail(DecodeError::NegativeLength(len));
                    };
                    if len > self.max {
                        return self.fail(DecodeError::TooLong { len, max: self.max });
                    }
                    self.data = Vec::with_capacity(len);
                    self.expected = Some(len);
                    len
                },
                ProcessStatus::Refill => return ProcessStatus::Refill,
                ProcessStatus::Error(e) => return self.fail(e),
            },
        };

        let start = self.data.len();
        let take = (expected - start).min(src.remaining());
        self.data.resize(start + take, 0);
        src.copy_to_slice(&mut self.data[start..]);
        if self.data.len() < expected {
            return ProcessStatus::Refill;
        }

        self.spent = true;
        ProcessStatus::Done(std::mem::take(&mut self.data))
    }

    fn reset(&mut self) {
        self.len.reset();
        self.expected = None;
        self.data.clear();
        self.spent = false;
    }
}

/// Reads an `i32` length followed by that many UTF-8 bytes.
pub struct StringReader {
    bytes: LengthPrefixed,
}

impl StringReader {
    /// Create a reader accepting strings of at most `max` bytes
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self { bytes: LengthPrefixed::new(max) }
    }
}

impl Reader for StringReader {
    type Output = String;

    fn process(&mut self, src: &mut dyn Buf) -> ProcessStatus<String> {
        match self.bytes.process(src) {
            ProcessStatus::Done(bytes) => match String::from_utf8(bytes) {
                Ok(text) => ProcessStatus::Done(text),
                Err(_) => ProcessStatus::Error(DecodeError::InvalidUtf8),
            },
            ProcessStatus::Refill => ProcessStatus::Refill,
            ProcessStatus::Error(e) => ProcessStatus::Error(e),
        }
    }

    fn reset(&mut self) {
        self.bytes.reset();
    }
}

/// Reads a socket address: kind byte (4 or 16), raw IP bytes, `i32` port.
pub fn address_reader() -> impl Reader<Output = SocketAddr> + Send {
    u8_reader().flat_map(ip_reader as fn(u8) -> BoxReader<IpAddr>).then(i32_reader()).try_finally(
        |(ip, port)| {
            let port = u16::try_from(port).map_err(|_| DecodeError::InvalidPort(port))?;
            Ok(SocketAddr::new(ip, port))
        },
    )
}

fn ip_reader(kind: u8) -> BoxReader<IpAddr> {
    match kind {
        4 => Fixed::<4>::new().finally(|octets: [u8; 4]| IpAddr::from(octets)).boxed(),
        16 => Fixed::<16>::new().finally(|octets: [u8; 16]| IpAddr::from(octets)).boxed(),
        other => Fail::new(DecodeError::InvalidAddressKind(other)).boxed(),
    }
}

/// Completes immediately with a fixed value, consuming nothing.
///
/// Decoder for frames without fields.
#[derive(Debug, Clone)]
pub struct Just<T> {
    value: T,
    spent: bool,
}

impl<T: Clone> Just<T> {
    /// Create a reader that yields `value`
    pub fn new(value: T) -> Self {
        Self { value, spent: false }
    }
}

impl<T: Clone> Reader for Just<T> {
    type Output = T;

    fn process(&mut self, _src: &mut dyn Buf) -> ProcessStatus<T> {
        if self.spent {
            return ProcessStatus::Error(DecodeError::NotReset);
        }
        self.spent = true;
        ProcessStatus::Done(self.value.clone())
    }

    fn reset(&mut self) {
        self.spent = false;
    }
}

/// Fails immediately with a fixed error.
#[derive(Debug, Clone)]
pub struct Fail<T> {
    error: DecodeError,
    _output: PhantomData<fn() -> T>,
}

impl<T> Fail<T> {
    /// Create a reader that always reports `error`
    pub fn new(error: DecodeError) -> Self {
        Self { error, _output: PhantomData }
    }
}

impl<T> Reader for Fail<T> {
    type Output = T;

    fn process(&mut self, _src: &mut dyn Buf) -> ProcessStatus<T> {
        ProcessStatus::Error(self.error.clone())
    }

    fn reset(&mut self) {}
}

/// Reads a length-prefixed opaque payload of at most `max` bytes.
pub fn blob_reader(max: usize) -> impl Reader<Output = Bytes> + Send {
    LengthPrefixed::new(max).finally(Bytes::from)
}
