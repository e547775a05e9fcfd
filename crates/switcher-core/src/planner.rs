//! Response planner (C5).
//!
//! Turns one inbound command into an ordered list of [`Carrier`]s: groups of
//! outbound frames with a relative send offset, a multicast flag, and an
//! optional ack-of packet id. The session engine (not this module) converts
//! `delay` into an absolute deadline against its [`Environment`](crate::env::Environment)
//! and assigns `ack_of` on the first carrier of the sequence.

use std::time::Duration;

use switcher_proto::Frame;
use switcher_state::StateStore;

use crate::command::{outbound, InboundCommand};
use crate::env::WallClock;

/// Interval between auto-transition animation steps.
const STEP_INTERVAL: Duration = Duration::from_millis(200);
/// Frames of transition progress consumed per animation step.
const STEP_DECREMENT: i32 = 6;
/// Nominal frame rate used to convert `total_frames` into a final-step delay.
const NOMINAL_FRAMERATE: f64 = 30.0;

/// A scheduled group of outbound frames.
#[derive(Debug, Clone)]
pub struct Carrier {
    /// Frames to send together in one packet.
    pub frames: Vec<Frame>,
    /// Offset from "now" at which this carrier becomes due. Zero means
    /// immediate.
    pub delay: Duration,
    /// Whether this carrier should also be fanned out to every other
    /// session (C7), not just the originating client.
    pub multicast: bool,
    /// The inbound packet id this carrier's ACK piggybacks, or `0` for none.
    /// Left at `0` by the planner; the session engine sets it on the first
    /// carrier of a sequence.
    pub ack_of: u16,
}

impl Carrier {
    fn new(frames: Vec<Frame>, delay: Duration) -> Self {
        Self { frames, delay, multicast: true, ack_of: 0 }
    }
}

/// Plan the response to an inbound command, mutating `state` along the way.
///
/// `me` commands that aren't recognized mix-effect targets still plan
/// against whatever (possibly empty) state is at that path; the state store
/// has no concept of "invalid index", it simply reads as missing.
#[must_use]
pub fn plan(cmd: &InboundCommand, state: &mut StateStore, wall: WallClock) -> Vec<Carrier> {
    match cmd {
        InboundCommand::Cut { me } => {
            cmd.apply(state);
            vec![Carrier::new(
                vec![
                    outbound::time(state, wall),
                    outbound::tally_by_index(state, *me),
                    outbound::tally_by_source(state, *me),
                    outbound::program_input(state, *me),
                    outbound::preview_input(state, *me),
                ],
                Duration::ZERO,
            )]
        },
        InboundCommand::SetProgram { me, .. } => {
            cmd.apply(state);
            vec![Carrier::new(
                vec![
                    outbound::time(state, wall),
                    outbound::tally_by_index(state, *me),
                    outbound::tally_by_source(state, *me),
                    outbound::program_input(state, *me),
                ],
                Duration::ZERO,
            )]
        },
        InboundCommand::SetPreview { me, .. } => {
            cmd.apply(state);
            vec![Carrier::new(
                vec![
                    outbound::time(state, wall),
                    outbound::tally_by_index(state, *me),
                    outbound::tally_by_source(state, *me),
                    outbound::preview_input(state, *me),
                ],
                Duration::ZERO,
            )]
        },
        InboundCommand::AutoTransition { me } => plan_auto_transition(*me, state, wall),
        InboundCommand::Unknown { .. } => Vec::new(),
    }
}

fn total_frames_for(state: &StateStore, me: u8) -> u8 {
    let style = state.get_str(&StateStore::me_path(me, "TransitionStyle.style")).unwrap_or("Mix");
    let rate_field = match style {
        "Dip" => "TransitionStyle.DipParameters.rate",
        "Wipe" => "TransitionStyle.WipeParameters.rate",
        _ => "TransitionStyle.MixParameters.rate",
    };
    let rate = state.get_u32(&StateStore::me_path(me, rate_field)).unwrap_or(30);
    rate.clamp(1, 255) as u8
}

fn plan_auto_transition(me: u8, state: &mut StateStore, wall: WallClock) -> Vec<Carrier> {
    let total = total_frames_for(state, me);
    let mut carriers = Vec::new();

    let mut remaining = i32::from(total) - 1;
    carriers.push(Carrier::new(
        vec![
            outbound::time(state, wall),
            outbound::tally_by_index(state, me),
            outbound::tally_by_source(state, me),
            outbound::preview_input(state, me),
            outbound::transition_position(state, me, clamp_remaining(remaining), total),
        ],
        Duration::ZERO,
    ));

    let mut offset = Duration::ZERO;
    loop {
        remaining -= STEP_DECREMENT;
        if remaining <= 0 {
            break;
        }
        offset += STEP_INTERVAL;
        carriers.push(Carrier::new(
            vec![outbound::time(state, wall.plus(offset)), outbound::transition_position(state, me, clamp_remaining(remaining), total)],
            offset,
        ));
    }

    // The final carrier's first TrPs reuses the last `remaining` value
    // computed above, even though that value is <=0 and was never sent on
    // its own. Preserved as observed, not "fixed".
    let carried_remaining = clamp_remaining(remaining);
    let final_delay = Duration::from_secs_f64(f64::from(total) / NOMINAL_FRAMERATE);
    InboundCommand::Cut { me }.apply(state);
    carriers.push(Carrier::new(
        vec![
            outbound::transition_position(state, me, carried_remaining, total),
            outbound::tally_by_index(state, me),
            outbound::tally_by_source(state, me),
            outbound::program_input(state, me),
            outbound::preview_input(state, me),
            outbound::transition_position(state, me, total, total),
        ],
        final_delay,
    ));

    carriers
}

fn clamp_remaining(remaining: i32) -> u8 {
    remaining.clamp(0, 255) as u8
}
