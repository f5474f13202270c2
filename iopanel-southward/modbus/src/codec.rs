use iopanel_sdk::{ChannelState, RegisterPolicy};

/// Conversions between channel on/off states and holding register words.
///
/// Both policies share the same write encoding; they only differ in how a
/// read value is interpreted.
pub struct RegisterCodec;

impl RegisterCodec {
    /// Register value commanding an output ON.
    pub const OUTPUT_ON: u16 = 0x100;
    /// Register value commanding an output OFF.
    pub const OUTPUT_OFF: u16 = 0x200;

    #[inline]
    pub fn encode(is_on: bool, _policy: RegisterPolicy) -> u16 {
        if is_on {
            Self::OUTPUT_ON
        } else {
            Self::OUTPUT_OFF
        }
    }

    #[inline]
    pub fn decode(value: u16, policy: RegisterPolicy) -> bool {
        match policy {
            RegisterPolicy::StrictSentinel => value == Self::OUTPUT_ON,
            RegisterPolicy::NonZero => value != 0,
        }
    }

    /// Decode a contiguous register block; element `i` becomes channel `i`.
    pub fn decode_channels(values: &[u16], policy: RegisterPolicy) -> Vec<ChannelState> {
        values
            .iter()
            .zip(0u16..)
            .map(|(&value, index)| ChannelState::new(index, Self::decode(value, policy)))
            .collect()
    }
}
