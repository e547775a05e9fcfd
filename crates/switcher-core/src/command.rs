//! Command registry and builders (C4).
//!
//! Inbound commands are a tagged enum with a `parse`/`apply` contract per
//! variant, dispatching on the four-byte command code rather than matching
//! on raw bytes at every call site. Outbound frames have no parse step, so
//! they're built directly by the functions in [`outbound`] rather than
//! forced through the same trait shape.

use bytes::Bytes;
use switcher_proto::Frame;
use switcher_state::StateStore;

use crate::error::CommandError;

/// `_ver` — protocol version.
pub const CODE_VER: [u8; 4] = *b"_ver";
/// `_pin` — product id / name.
pub const CODE_PIN: [u8; 4] = *b"_pin";
/// `InCm` — end of initial dump.
pub const CODE_INCM: [u8; 4] = *b"InCm";
/// `CPgI` — client sets program input.
pub const CODE_CPGI: [u8; 4] = *b"CPgI";
/// `CPvI` — client sets preview input.
pub const CODE_CPVI: [u8; 4] = *b"CPvI";
/// `DCut` — client requests a cut.
pub const CODE_DCUT: [u8; 4] = *b"DCut";
/// `DAut` — client requests an auto-transition.
pub const CODE_DAUT: [u8; 4] = *b"DAut";
/// `Time` — server clock.
pub const CODE_TIME: [u8; 4] = *b"Time";
/// `PrgI` — server reports program input.
pub const CODE_PRGI: [u8; 4] = *b"PrgI";
/// `PrvI` — server reports preview input.
pub const CODE_PRVI: [u8; 4] = *b"PrvI";
/// `TrPs` — server reports transition position.
pub const CODE_TRPS: [u8; 4] = *b"TrPs";
/// `TlIn` — server reports tally by input index.
pub const CODE_TLIN: [u8; 4] = *b"TlIn";
/// `TlSr` — server reports tally by source id.
pub const CODE_TLSR: [u8; 4] = *b"TlSr";

/// A parsed inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCommand {
    /// `DCut(me)` — instantaneous program/preview swap.
    Cut {
        /// Mix-effect block index.
        me: u8,
    },
    /// `DAut(me)` — animated program/preview swap.
    AutoTransition {
        /// Mix-effect block index.
        me: u8,
    },
    /// `CPgI(me, source)` — set program input.
    SetProgram {
        /// Mix-effect block index.
        me: u8,
        /// Requested program source id.
        source: u16,
    },
    /// `CPvI(me, source)` — set preview input.
    SetPreview {
        /// Mix-effect block index.
        me: u8,
        /// Requested preview source id.
        source: u16,
    },
    /// Any code not recognized by this registry. Pass-through only: no
    /// apply, no encode, but still ACKed like any other inbound frame.
    Unknown {
        /// The unrecognized 4-ASCII code.
        code: [u8; 4],
        /// The frame's payload, preserved verbatim.
        payload: Bytes,
    },
}

impl InboundCommand {
    /// Parse a frame into a tagged command. Unrecognized codes always parse
    /// successfully into [`Self::Unknown`] — only a recognized code with the
    /// wrong payload length fails, per the `BAD_PAYLOAD` disposition.
    pub fn parse(frame: &Frame) -> Result<Self, CommandError> {
        match frame.code {
            CODE_DCUT => {
                expect_len("DCut", &frame.payload, 1)?;
                Ok(Self::Cut { me: frame.payload[0] })
            },
            CODE_DAUT => {
                expect_len("DAut", &frame.payload, 1)?;
                Ok(Self::AutoTransition { me: frame.payload[0] })
            },
            CODE_CPGI => {
                let (me, source) = parse_set_input("CPgI", &frame.payload)?;
                Ok(Self::SetProgram { me, source })
            },
            CODE_CPVI => {
                let (me, source) = parse_set_input("CPvI", &frame.payload)?;
                Ok(Self::SetPreview { me, source })
            },
            code => Ok(Self::Unknown { code, payload: frame.payload.clone() }),
        }
    }

    /// Mutate `state` according to this command. `AutoTransition` is a
    /// no-op here: the swap happens at the end of the animation, driven by
    /// the response planner, not at parse time.
    pub fn apply(&self, state: &mut StateStore) {
        match self {
            Self::Cut { me } => {
                let program_path = StateStore::me_path(*me, "Program.input");
                let preview_path = StateStore::me_path(*me, "Preview.input");
                let program = state.get_str(&program_path).unwrap_or("0").to_string();
                let preview = state.get_str(&preview_path).unwrap_or("0").to_string();
                state.set_numeric_str(&program_path, preview);
                state.set_numeric_str(&preview_path, program);
            },
            Self::SetProgram { me, source } => {
                state.set_numeric_str(&StateStore::me_path(*me, "Program.input"), source);
            },
            Self::SetPreview { me, source } => {
                state.set_numeric_str(&StateStore::me_path(*me, "Preview.input"), source);
            },
            Self::AutoTransition { .. } | Self::Unknown { .. } => {},
        }
    }

    /// The mix-effect block this command targets, if any.
    #[must_use]
    pub fn me(&self) -> Option<u8> {
        match *self {
            Self::Cut { me } | Self::AutoTransition { me } | Self::SetProgram { me, .. } | Self::SetPreview { me, .. } => {
                Some(me)
            },
            Self::Unknown { .. } => None,
        }
    }
}

fn expect_len(code: &'static str, payload: &[u8], expected: usize) -> Result<(), CommandError> {
    if payload.len() == expected {
        Ok(())
    } else {
        Err(CommandError::BadPayload { code, expected, actual: payload.len() })
    }
}

fn parse_set_input(code: &'static str, payload: &[u8]) -> Result<(u8, u16), CommandError> {
    expect_len(code, payload, 4)?;
    let me = payload[0];
    let source = u16::from_be_bytes([payload[2], payload[3]]);
    Ok((me, source))
}

/// Builders for outbound frames. Several (`Time`, `TlIn`, `TlSr`, `PrgI`,
/// `PrvI`, `TrPs`) read their fields straight from the state store rather
/// than carrying them as constructor arguments, matching the reference
/// `to_bytes()` methods which pull from `conf_db` at encode time.
pub mod outbound {
    use switcher_state::StateStore;

    use super::{
        CODE_INCM, CODE_PIN, CODE_PRGI, CODE_PRVI, CODE_TIME, CODE_TLIN, CODE_TLSR, CODE_TRPS, CODE_VER,
    };
    use crate::env::WallClock;
    use switcher_proto::Frame;

    /// `_ver`: fixed protocol version this server implements.
    #[must_use]
    pub fn version() -> Frame {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&2u16.to_be_bytes());
        payload.extend_from_slice(&30u16.to_be_bytes());
        Frame::new(CODE_VER, payload)
    }

    /// `_pin`: product name, NUL-padded/truncated to 44 bytes.
    #[must_use]
    pub fn product_id(state: &StateStore) -> Frame {
        let name = state.get_str("product").unwrap_or("");
        let mut bytes = [0u8; 44];
        let src = name.as_bytes();
        let copy_len = src.len().min(bytes.len());
        bytes[..copy_len].copy_from_slice(&src[..copy_len]);
        Frame::new(CODE_PIN, bytes.to_vec())
    }

    /// `InCm`: marks the end of the initial-state dump.
    #[must_use]
    pub fn init_complete() -> Frame {
        Frame::new(CODE_INCM, vec![1, 0, 0, 0])
    }

    /// `Time`: wall clock plus a frame count derived from `VideoMode.videoMode`.
    #[must_use]
    pub fn time(state: &StateStore, wall: WallClock) -> Frame {
        let video_mode = state.get_str("VideoMode.videoMode").unwrap_or("");
        let framerate = framerate_for(video_mode);
        let frame_number = ((f64::from(wall.micros) / 1_000_000.0) * framerate) as u8;
        let mut payload = vec![wall.hour, wall.minute, wall.second, frame_number];
        payload.extend_from_slice(&[0, 0, 0, 0]);
        Frame::new(CODE_TIME, payload)
    }

    fn framerate_for(video_mode: &str) -> f64 {
        if video_mode.contains("5994") {
            59.94
        } else if video_mode.contains("2997") {
            29.97
        } else if video_mode.contains("2398") {
            23.98
        } else if video_mode.contains("50") {
            50.0
        } else if video_mode.contains("25") {
            25.0
        } else if video_mode.contains("24") {
            24.0
        } else {
            30.0
        }
    }

    /// `PrgI`: current program input for `me`.
    #[must_use]
    pub fn program_input(state: &StateStore, me: u8) -> Frame {
        let source = state.get_u32(&StateStore::me_path(me, "Program.input")).unwrap_or(0);
        let mut payload = vec![me, 0];
        payload.extend_from_slice(&(source as u16).to_be_bytes());
        Frame::new(CODE_PRGI, payload)
    }

    /// `PrvI`: current preview input for `me`.
    #[must_use]
    pub fn preview_input(state: &StateStore, me: u8) -> Frame {
        let source = state.get_u32(&StateStore::me_path(me, "Preview.input")).unwrap_or(0);
        let mut payload = vec![me, 0];
        payload.extend_from_slice(&(source as u16).to_be_bytes());
        payload.extend_from_slice(&[0, 0, 0, 0]);
        Frame::new(CODE_PRVI, payload)
    }

    /// `TrPs`: transition position. `total` must be nonzero (the planner
    /// clamps it before scheduling any transition). As a side effect,
    /// writes the computed position back into `TransitionStyle.transitionPosition`.
    #[must_use]
    pub fn transition_position(state: &mut StateStore, me: u8, frames_remaining: u8, total: u8) -> Frame {
        let in_transition = u8::from(frames_remaining != total);
        let position = 10000u32.saturating_sub((u32::from(frames_remaining) * 10000) / u32::from(total));
        state.set_numeric_str(&StateStore::me_path(me, "TransitionStyle.transitionPosition"), position);
        let mut payload = vec![me, in_transition, frames_remaining, 0];
        payload.extend_from_slice(&(position as u16).to_be_bytes());
        payload.extend_from_slice(&[0, 0]);
        Frame::new(CODE_TRPS, payload)
    }

    fn is_mid_transition(state: &StateStore, me: u8) -> bool {
        state
            .get_u32(&StateStore::me_path(me, "TransitionStyle.transitionPosition"))
            .is_some_and(|position| position > 0 && position < 10_000)
    }

    /// `TlIn`: tally by input index, one byte per configured input.
    #[must_use]
    pub fn tally_by_index(state: &StateStore, me: u8) -> Frame {
        let program = state.get_u32(&StateStore::me_path(me, "Program.input")).unwrap_or(0);
        let preview = state.get_u32(&StateStore::me_path(me, "Preview.input")).unwrap_or(0);
        let mid_transition = is_mid_transition(state, me);
        let num_inputs = state.count("Settings.Inputs") as u32;

        let mut payload = Vec::with_capacity(2 + num_inputs as usize);
        payload.extend_from_slice(&(num_inputs as u16).to_be_bytes());
        for input in 1..=num_inputs {
            let mut byte = 0u8;
            if program == input {
                byte |= 0x01;
            }
            if preview == input {
                byte |= 0x02;
                if mid_transition {
                    byte |= 0x01;
                }
            }
            payload.push(byte);
        }
        payload.extend_from_slice(&[0, 0]);
        Frame::new(CODE_TLIN, payload)
    }

    /// `TlSr`: tally by source id, over the product's configured source list.
    #[must_use]
    pub fn tally_by_source(state: &StateStore, me: u8) -> Frame {
        let program = state.get_u32(&StateStore::me_path(me, "Program.input")).unwrap_or(0);
        let preview = state.get_u32(&StateStore::me_path(me, "Preview.input")).unwrap_or(0);
        let mid_transition = is_mid_transition(state, me);
        let product = state.get_str("product").unwrap_or("");
        let sources = switcher_state::sources_for_product(product);

        let mut payload = Vec::with_capacity(2 + sources.len() * 3);
        payload.extend_from_slice(&(sources.len() as u16).to_be_bytes());
        for &source_id in sources {
            let mut byte = 0u8;
            if program == u32::from(source_id) {
                byte |= 0x01;
            }
            if preview == u32::from(source_id) {
                byte |= 0x02;
                if mid_transition {
                    byte |= 0x01;
                }
            }
            payload.extend_from_slice(&source_id.to_be_bytes());
            payload.push(byte);
        }
        payload.extend_from_slice(&[0, 0]);
        Frame::new(CODE_TLSR, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switcher_proto::Frame;

    #[test]
    fn parses_cut() {
        let frame = Frame::new(CODE_DCUT, vec![2]);
        assert_eq!(InboundCommand::parse(&frame).unwrap(), InboundCommand::Cut { me: 2 });
    }

    #[test]
    fn parses_set_program() {
        let frame = Frame::new(CODE_CPGI, vec![0, 0, 0, 5]);
        assert_eq!(InboundCommand::parse(&frame).unwrap(), InboundCommand::SetProgram { me: 0, source: 5 });
    }

    #[test]
    fn rejects_short_payload() {
        let frame = Frame::new(CODE_CPGI, vec![0, 0]);
        let err = InboundCommand::parse(&frame).unwrap_err();
        assert_eq!(err, CommandError::BadPayload { code: "CPgI", expected: 4, actual: 2 });
        assert!(err.is_transient());
    }

    #[test]
    fn unknown_code_parses_and_is_a_no_op() {
        let frame = Frame::new(*b"ZZZZ", vec![9, 9]);
        let cmd = InboundCommand::parse(&frame).unwrap();
        assert!(matches!(cmd, InboundCommand::Unknown { .. }));
        let mut state = StateStore::new(switcher_state::load_default());
        let before = state.clone();
        cmd.apply(&mut state);
        assert_eq!(format!("{before:?}"), format!("{state:?}"));
    }

    #[test]
    fn cut_swaps_program_and_preview() {
        let mut state = StateStore::new(switcher_state::load_default());
        InboundCommand::Cut { me: 0 }.apply(&mut state);
        assert_eq!(state.get_str(&StateStore::me_path(0, "Program.input")), Some("2"));
        assert_eq!(state.get_str(&StateStore::me_path(0, "Preview.input")), Some("1"));
    }

    #[test]
    fn tally_by_index_sets_bits() {
        let state = StateStore::new(switcher_state::load_default());
        let frame = outbound::tally_by_index(&state, 0);
        // 4 configured inputs; program=1 (bit 0x01), preview=2 (bit 0x02)
        assert_eq!(&frame.payload[0..2], &4u16.to_be_bytes());
        assert_eq!(frame.payload[2], 0x01);
        assert_eq!(frame.payload[3], 0x02);
    }

    #[test]
    fn tally_mid_transition_sets_program_bit_on_preview_input() {
        let mut state = StateStore::new(switcher_state::load_default());
        state.set_numeric_str(&StateStore::me_path(0, "TransitionStyle.transitionPosition"), 4000);
        let frame = outbound::tally_by_index(&state, 0);
        // preview input (index 2) should carry both 0x01 and 0x02
        assert_eq!(frame.payload[3], 0x03);
    }
}
