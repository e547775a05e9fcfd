//! Property tests for the frame and envelope codecs: envelope round-trip,
//! length invariant, frame sum.

use proptest::prelude::*;
use switcher_proto::{Envelope, Frame};

fn arb_code() -> impl Strategy<Value = [u8; 4]> {
    "[A-Za-z_]{4}".prop_map(|s| {
        let bytes = s.as_bytes();
        [bytes[0], bytes[1], bytes[2], bytes[3]]
    })
}

fn arb_frame() -> impl Strategy<Value = Frame> {
    (arb_code(), proptest::collection::vec(any::<u8>(), 0..64))
        .prop_map(|(code, payload)| Frame::new(code, payload))
}

fn arb_envelope() -> impl Strategy<Value = Envelope> {
    (
        0u8..0x20,
        any::<u16>(),
        any::<u16>(),
        any::<u16>(),
        proptest::collection::vec(any::<u8>(), 0..200),
    )
        .prop_map(|(flags, session_id, acked_packet_id, packet_id, payload)| Envelope {
            flags: flags & 0x1F,
            session_id,
            acked_packet_id,
            packet_id,
            payload: payload.into(),
        })
}

proptest! {
    #[test]
    fn frame_round_trips(frame in arb_frame()) {
        let mut buf = Vec::new();
        frame.encode(&mut buf);
        let (decoded, consumed) = Frame::decode(&buf).unwrap();
        prop_assert_eq!(decoded, frame);
        prop_assert_eq!(consumed, buf.len());
    }

    #[test]
    fn envelope_round_trips(env in arb_envelope()) {
        let encoded = env.encode().unwrap();
        let decoded = Envelope::decode(&encoded).unwrap();
        prop_assert_eq!(decoded, env);
    }

    #[test]
    fn envelope_length_field_matches_byte_length(env in arb_envelope()) {
        let encoded = env.encode().unwrap();
        let flags_and_length = u16::from_be_bytes([encoded[0], encoded[1]]);
        prop_assert_eq!(usize::from(flags_and_length & 0x07FF), encoded.len());
    }

    #[test]
    fn frame_sum_matches_packet_length(frames in proptest::collection::vec(arb_frame(), 0..8)) {
        let payload = Frame::encode_all(&frames);
        let env = Envelope {
            flags: switcher_proto::packet_flags::COMMAND,
            session_id: 1,
            acked_packet_id: 0,
            packet_id: 1,
            payload: payload.into(),
        };
        let encoded = env.encode().unwrap();
        let frame_sum: usize = frames.iter().map(Frame::encoded_len).sum();
        prop_assert_eq!(frame_sum + 12, encoded.len());
    }
}
