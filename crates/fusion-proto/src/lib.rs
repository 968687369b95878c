//! # ChatFusion Protocol: Wire Format
//!
//! This crate implements the binary framing layer shared by chat clients and
//! federated chat servers.
//!
//! ## Protocol Design
//!
//! Every message is a single frame:
//!
//! ```text
//! ┌──────────┬──────────────────────────────┐
//! │ opcode:1 │ opcode-specific fields (BE)  │
//! └──────────┴──────────────────────────────┘
//! ```
//!
//! - **string**: `i32` byte length followed by UTF-8 bytes
//! - **address**: kind byte (4 or 16), raw IP bytes, `i32` port
//! - **list**: `i32` element count followed by the elements
//!
//! There is no length prefix on the frame itself, so a frame can only be
//! decoded by walking its fields. Decoding is therefore built from small
//! incremental [`Reader`](reader::Reader)s that can be suspended at any byte
//! boundary and resumed when more input arrives.
//!
//! ## Implementation Notes
//!
//! - **Write the resume logic once**: primitive readers handle partial input,
//!   and every frame decoder is assembled from them with combinators
//!   ([`flat_map`](reader::Reader::flat_map), [`then`](reader::Reader::then),
//!   [`finally`](reader::Reader::finally), [`repeat`](reader::Reader::repeat)).
//!   No frame type carries its own incremental bookkeeping.
//!
//! - **Closed set of frames**: [`Frame`] is an enum and the opcode table is an
//!   exhaustive `match`, so adding a frame without a decoder does not compile.
//!
//! ## Security Properties
//!
//! - **Bounded allocation**: declared lengths and counts are validated against
//!   [`limits`] before anything is allocated.
//! - **Symmetric validation**: the encoder refuses to emit a frame the decoder
//!   would reject.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod frame;
pub mod limits;
pub mod opcodes;
pub mod payloads;
pub mod reader;
mod writer;

pub use errors::{DecodeError, ProtocolError, Result};
pub use frame::{Frame, FrameReader};
pub use opcodes::Opcode;
pub use payloads::{wire_address, DirectMessage, FileBlock, PublicMessage, ServerIdentity, ServerInfo};
pub use reader::{ProcessStatus, Reader};
