//! Property-based tests for the connection controller.
//!
//! These tests verify, for arbitrary payloads and socket behaviour:
//! - Bytes come out in the order they were queued, whatever the write sizes
//! - Frames come out identical, whatever the read sizes
//! - A closing connection finishes exactly when its queue is drained

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{Ipv4Addr, SocketAddr},
};

use fusion_core::connection::{ConnId, Connection, Interest, CHUNK_SIZE};
use fusion_proto::{Frame, PublicMessage};
use proptest::prelude::*;

fn remote() -> SocketAddr {
    SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 9000)
}

/// Writer that accepts `sizes[i]` bytes on call `i`, then would block once
/// per zero entry.
struct ShortWrites {
    sizes: VecDeque<usize>,
    written: Vec<u8>,
}

impl Write for ShortWrites {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.sizes.pop_front() {
            Some(0) => Err(io::ErrorKind::WouldBlock.into()),
            Some(n) => {
                let n = n.min(buf.len());
                self.written.extend_from_slice(&buf[..n]);
                Ok(n)
            },
            None => {
                self.written.extend_from_slice(buf);
                Ok(buf.len())
            },
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reader that hands out the stream in the given chunk sizes, would-blocking
/// between chunks.
struct ShortReads {
    data: VecDeque<u8>,
    sizes: VecDeque<usize>,
    blocked: bool,
}

impl Read for ShortReads {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.data.is_empty() || self.blocked {
            self.blocked = false;
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let want = self.sizes.pop_front().unwrap_or(usize::MAX).max(1);
        let n = want.min(buf.len()).min(self.data.len());
        for (slot, byte) in buf.iter_mut().zip(self.data.drain(..n)) {
            *slot = byte;
        }
        self.blocked = true;
        Ok(n)
    }
}

fn message_strategy() -> impl Strategy<Value = Frame> {
    ("[a-z]{1,10}", "[a-z]{1,10}", "\\PC{1,200}").prop_map(|(origin_server, sender, text)| {
        Frame::PublicMessage(PublicMessage { origin_server, sender, text })
    })
}

proptest! {
    #[test]
    fn prop_output_order_survives_short_writes(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..3000), 1..6),
        sizes in prop::collection::vec(0usize..700, 0..40),
    ) {
        let mut conn = Connection::accepted(ConnId::new(1), remote());
        let mut expected = Vec::new();
        for payload in &payloads {
            conn.queue_data(payload).unwrap();
            expected.extend_from_slice(payload);
        }
        prop_assert_eq!(conn.pending_output(), expected.len());

        let mut sink = ShortWrites { sizes: sizes.into(), written: Vec::new() };
        while conn.pending_output() > 0 {
            conn.on_writable(&mut sink).unwrap();
        }
        prop_assert_eq!(sink.written, expected);
        prop_assert!(!conn.interest().contains(Interest::WRITE));
    }

    #[test]
    fn prop_frames_survive_short_reads(
        frames in prop::collection::vec(message_strategy(), 1..10),
        sizes in prop::collection::vec(1usize..CHUNK_SIZE, 0..60),
    ) {
        let mut stream = Vec::new();
        for frame in &frames {
            stream.extend_from_slice(&frame.to_bytes().unwrap());
        }

        let mut conn = Connection::accepted(ConnId::new(1), remote());
        let mut src = ShortReads { data: stream.into(), sizes: sizes.into(), blocked: false };
        let mut decoded = Vec::new();
        while !src.data.is_empty() {
            let outcome = conn.on_readable(&mut src);
            prop_assert!(outcome.end.is_none());
            decoded.extend(outcome.frames);
        }
        prop_assert_eq!(decoded, frames);
    }

    #[test]
    fn prop_closing_finishes_when_drained(
        payload in prop::collection::vec(any::<u8>(), 1..5000),
        sizes in prop::collection::vec(1usize..900, 1..20),
    ) {
        let mut conn = Connection::accepted(ConnId::new(1), remote());
        conn.queue_data(&payload).unwrap();
        conn.close_when_all_sent();
        prop_assert!(conn.queue_data(b"more").is_err());

        let mut sink = ShortWrites { sizes: sizes.into(), written: Vec::new() };
        loop {
            prop_assert_eq!(conn.is_finished(), conn.pending_output() == 0);
            if conn.is_finished() {
                break;
            }
            conn.on_writable(&mut sink).unwrap();
        }
        prop_assert_eq!(sink.written, payload);
        prop_assert_eq!(conn.interest(), Interest::empty());
    }
}
