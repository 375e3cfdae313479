//! Bit-level wire formats. Everything here must agree byte for byte on the
//! two ends of a connection; the estimated sizes drive packet splitting and
//! have to match the emitted sizes exactly.

pub mod frame;
pub mod message;
pub mod object;
pub mod sent;

pub use self::frame::FrameState;
pub use self::message::{ClientStateMessage, Message, MessageSink, ObjectStateMessage};
pub use self::object::ObjectState;
pub use self::sent::SentState;

/// Half the 16-bit sequence space, minus slack for reordering. Ids further
/// apart than this are assumed to have wrapped.
pub const SEQUENCE_WRAP_MARGIN: u16 = 32000;

/// Wraparound-aware ordering of 16-bit message ids: if the ids are more
/// than `SEQUENCE_WRAP_MARGIN` apart, the numerically smaller one is the
/// later message.
#[inline]
pub fn id_is_before(a: u16, b: u16) -> bool {
    let distance = (i32::from(a) - i32::from(b)).abs();

    if distance > i32::from(SEQUENCE_WRAP_MARGIN) {
        a > b
    } else {
        a < b
    }
}
