//! Field encoders used by [`Frame::encode`](crate::Frame::encode).

use std::net::{IpAddr, SocketAddr};

use bytes::{BufMut, BytesMut};

use crate::{
    limits::{MAX_BLOCK_BYTES, MAX_LIST_LEN, MAX_STRING_BYTES},
    Opcode, ProtocolError, Result,
};

pub(crate) struct FrameWriter<'a> {
    dst: &'a mut BytesMut,
}

impl<'a> FrameWriter<'a> {
    pub(crate) fn new(dst: &'a mut BytesMut, opcode: Opcode) -> Self {
        dst.put_u8(opcode.to_u8());
        Self { dst }
    }

    pub(crate) fn string(&mut self, field: &'static str, value: &str) -> Result<&mut Self> {
        if value.len() > MAX_STRING_BYTES {
            return Err(ProtocolError::FieldTooLong { field, len: value.len(), max: MAX_STRING_BYTES });
        }
        self.put_len(value.len());
        self.dst.put_slice(value.as_bytes());
        Ok(self)
    }

    pub(crate) fn strings(&mut self, field: &'static str, values: &[String]) -> Result<&mut Self> {
        if values.len() > MAX_LIST_LEN {
            return Err(ProtocolError::ListTooLong { field, count: values.len(), max: MAX_LIST_LEN });
        }
        self.put_len(values.len());
        for value in values {
            self.string(field, value)?;
        }
        Ok(self)
    }

    /// Kind byte, IP octets, port. IPv6 flow info and scope id have no wire
    /// representation and are not sent; see [`wire_address`](crate::payloads::wire_address).
    pub(crate) fn address(&mut self, address: &SocketAddr) -> &mut Self {
        match address.ip() {
            IpAddr::V4(ip) => {
                self.dst.put_u8(4);
                self.dst.put_slice(&ip.octets());
            },
            IpAddr::V6(ip) => {
                self.dst.put_u8(16);
                self.dst.put_slice(&ip.octets());
            },
        }
        self.dst.put_i32(i32::from(address.port()));
        self
    }

    pub(crate) fn i32(&mut self, value: i32) -> &mut Self {
        self.dst.put_i32(value);
        self
    }

    pub(crate) fn i64(&mut self, value: i64) -> &mut Self {
        self.dst.put_i64(value);
        self
    }

    pub(crate) fn block(&mut self, data: &[u8]) -> Result<&mut Self> {
        if data.len() > MAX_BLOCK_BYTES {
            return Err(ProtocolError::BlockTooLarge { size: data.len(), max: MAX_BLOCK_BYTES });
        }
        self.put_len(data.len());
        self.dst.put_slice(data);
        Ok(self)
    }

    // Callers bound `len` by one of the limits, all far below i32::MAX.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn put_len(&mut self, len: usize) {
        self.dst.put_i32(len as i32);
    }
}
