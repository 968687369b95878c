//! Property-based tests for the frame codec.
//!
//! These tests verify, for arbitrary valid frames:
//! - Decoding an encoded frame gives the frame back
//! - The decoded value does not depend on how the bytes are chunked
//! - Unknown opcodes are rejected
//! - Arbitrary input never panics the decoder

use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6};

use bytes::{Bytes, BytesMut};
use fusion_proto::{
    DecodeError, DirectMessage, FileBlock, Frame, FrameReader, Opcode, PublicMessage,
    ServerIdentity, ServerInfo,
};
use proptest::prelude::*;

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,29}"
}

fn text_strategy() -> impl Strategy<Value = String> {
    "\\PC{0,80}"
}

fn address_strategy() -> impl Strategy<Value = SocketAddr> {
    prop_oneof![
        (any::<[u8; 4]>(), any::<u16>()).prop_map(|(ip, port)| SocketAddr::new(IpAddr::from(ip), port)),
        (any::<[u8; 16]>(), any::<u16>()).prop_map(|(ip, port)| SocketAddr::new(IpAddr::from(ip), port)),
    ]
}

fn server_info_strategy() -> impl Strategy<Value = ServerInfo> {
    (name_strategy(), address_strategy(), prop::collection::vec(name_strategy(), 0..6))
        .prop_map(|(name, address, members)| ServerInfo { name, address, members })
}

fn frame_strategy() -> impl Strategy<Value = Frame> {
    prop_oneof![
        name_strategy().prop_map(|username| Frame::AnonymousLogin { username }),
        name_strategy().prop_map(|server_name| Frame::LoginAccepted { server_name }),
        Just(Frame::LoginRefused),
        (name_strategy(), name_strategy(), text_strategy()).prop_map(|(origin_server, sender, text)| {
            Frame::PublicMessage(PublicMessage { origin_server, sender, text })
        }),
        (name_strategy(), name_strategy(), name_strategy(), name_strategy(), text_strategy()).prop_map(
            |(origin_server, sender, dest_server, recipient, text)| {
                Frame::DirectMessage(DirectMessage { origin_server, sender, dest_server, recipient, text })
            }
        ),
        (
            (name_strategy(), name_strategy(), name_strategy(), name_strategy()),
            any::<i64>(),
            name_strategy(),
            1..=i32::MAX,
            prop::collection::vec(any::<u8>(), 0..256),
        )
            .prop_map(|((origin_server, sender, dest_server, recipient), file_id, file_name, block_count, data)| {
                Frame::FileBlock(FileBlock {
                    origin_server,
                    sender,
                    dest_server,
                    recipient,
                    file_id,
                    file_name,
                    block_count,
                    data: Bytes::from(data),
                })
            }),
        server_info_strategy().prop_map(Frame::FusionInit),
        server_info_strategy().prop_map(Frame::FusionInitOk),
        Just(Frame::FusionInitKo),
        address_strategy().prop_map(|leader| Frame::FusionInitForward { leader }),
        address_strategy().prop_map(|remote| Frame::FusionRequest { remote }),
        (name_strategy(), address_strategy())
            .prop_map(|(name, address)| Frame::FusionChangeLeader(ServerIdentity { name, address })),
        name_strategy().prop_map(|name| Frame::FusionMerge { name }),
    ]
}

fn encode(frame: &Frame) -> Vec<u8> {
    frame.to_bytes().expect("generated frames are within limits").to_vec()
}

/// Feed `chunks` one after the other, collecting every decoded frame.
fn decode_chunks<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Result<Vec<Frame>, DecodeError> {
    let mut reader = FrameReader::new();
    let mut frames = Vec::new();
    for chunk in chunks {
        let mut chunk = chunk;
        while let Some(frame) = reader.next_frame(&mut chunk)? {
            frames.push(frame);
        }
    }
    Ok(frames)
}

proptest! {
    #[test]
    fn prop_round_trip(frame in frame_strategy()) {
        let bytes = encode(&frame);
        prop_assert_eq!(bytes[0], frame.opcode().to_u8());
        prop_assert_eq!(decode_chunks([bytes.as_slice()]), Ok(vec![frame]));
    }

    #[test]
    fn prop_bytewise_feed_matches_whole_feed(frame in frame_strategy()) {
        let bytes = encode(&frame);
        let mut reader = FrameReader::new();

        for (i, byte) in bytes.iter().enumerate() {
            let mut one: &[u8] = std::slice::from_ref(byte);
            let decoded = reader.next_frame(&mut one).unwrap();
            if i + 1 < bytes.len() {
                prop_assert_eq!(decoded, None, "frame completed early at byte {}", i);
            } else {
                prop_assert_eq!(decoded, Some(frame.clone()));
            }
        }
    }

    #[test]
    fn prop_any_split_decodes_identically(frame in frame_strategy(), a in any::<prop::sample::Index>(), b in any::<prop::sample::Index>()) {
        let bytes = encode(&frame);
        let (mut lo, mut hi) = (a.index(bytes.len() + 1), b.index(bytes.len() + 1));
        if lo > hi {
            std::mem::swap(&mut lo, &mut hi);
        }

        let chunks = [&bytes[..lo], &bytes[lo..hi], &bytes[hi..]];
        prop_assert_eq!(decode_chunks(chunks), Ok(vec![frame]));
    }

    #[test]
    fn prop_back_to_back_frames_survive_rechunking(
        frames in prop::collection::vec(frame_strategy(), 1..8),
        chunk_size in 1usize..64,
    ) {
        let mut stream = BytesMut::new();
        for frame in &frames {
            frame.encode(&mut stream).unwrap();
        }

        prop_assert_eq!(decode_chunks(stream.chunks(chunk_size)), Ok(frames));
    }

    #[test]
    fn prop_unknown_opcode_is_rejected(byte in any::<u8>(), tail in prop::collection::vec(any::<u8>(), 0..16)) {
        prop_assume!(Opcode::from_u8(byte).is_none());

        let mut input = vec![byte];
        input.extend(tail);
        prop_assert_eq!(decode_chunks([input.as_slice()]), Err(DecodeError::UnknownOpcode(byte)));
    }

    #[test]
    fn prop_arbitrary_input_never_panics(input in prop::collection::vec(any::<u8>(), 0..512)) {
        // Either frames, a clean error, or a partial frame waiting for input.
        if let Ok(frames) = decode_chunks([input.as_slice()]) {
            for frame in frames {
                let reencoded = encode(&frame);
                prop_assert_eq!(decode_chunks([reencoded.as_slice()]), Ok(vec![frame]));
            }
        }
    }

    #[test]
    fn prop_identity_address_survives_round_trip(
        ip in any::<[u8; 16]>(),
        port in any::<u16>(),
        flowinfo in any::<u32>(),
        scope_id in any::<u32>(),
    ) {
        let scoped = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(ip), port, flowinfo, scope_id));
        let frame = Frame::FusionChangeLeader(ServerIdentity::new("alpha", scoped));
        let bytes = frame.to_bytes().unwrap();
        prop_assert_eq!(decode_chunks([&bytes[..]]), Ok(vec![frame]));
    }
}
