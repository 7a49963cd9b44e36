//! TS Header Decoder (spec.md §4.1).
//!
//! Pure function over the first up-to-5 bytes of a 188-byte packet: reads
//! the 4-byte link-layer header and, if present, the adaptation-field
//! length byte, and reports the effective payload header size.

use crate::error::DropReason;
use modular_bitfield_msb::prelude::*;

/// Scrambling-control field carried in every TS packet header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[bits = 2]
pub enum ScramblingControl {
    /// Payload is not scrambled.
    NotScrambled = 0,
    /// Reserved by the standard; never valid for decryption.
    Reserved = 1,
    /// Payload is scrambled with the even control word.
    Even = 2,
    /// Payload is scrambled with the odd control word.
    Odd = 3,
}

/// Link-layer header found at the start of every 188-byte MPEG-TS packet.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub sync_byte: B8,
    pub tei: bool,
    pub pusi: bool,
    pub priority: bool,
    pub pid: B13,
    pub tsc: ScramblingControl,
    pub has_adaptation_field: bool,
    pub has_payload: bool,
    pub continuity_counter: B4,
}

/// Result of decoding a packet's header: everything the descrambler core
/// needs before it can classify and act on the packet.
#[derive(Debug, Clone, Copy)]
pub struct DecodedHeader {
    pub pid: u16,
    pub has_payload: bool,
    pub has_adaptation: bool,
    pub scrambling_control: ScramblingControl,
    /// Number of bytes occupied by the header plus (if present) the
    /// adaptation field; payload, if any, begins at this offset.
    pub header_size: usize,
}

/// Decode the first up-to-5 bytes of a packet (spec.md §4.1).
pub(crate) fn decode(packet: &[u8]) -> Result<DecodedHeader, DropReason> {
    if packet.len() < 4 {
        return Err(DropReason::HeaderUnreadable);
    }
    let raw = PacketHeader::from_bytes([packet[0], packet[1], packet[2], packet[3]]);
    let scrambling_control = raw.tsc();
    let has_adaptation = raw.has_adaptation_field();

    let header_size = if has_adaptation {
        if packet.len() < 5 {
            return Err(DropReason::HeaderUnreadable);
        }
        let af_length = packet[4] as usize;
        if af_length >= 183 {
            return Err(DropReason::AdaptationInvalid);
        }
        4 + 1 + af_length
    } else {
        4
    };

    Ok(DecodedHeader {
        pid: raw.pid(),
        has_payload: raw.has_payload(),
        has_adaptation,
        scrambling_control,
        header_size,
    })
}

/// Overwrite the scrambling-control bits of a packet's header in place,
/// leaving every other header bit untouched (spec.md §4.3 step 4, testable
/// property 4).
pub(crate) fn clear_scrambling_control(packet: &mut [u8]) {
    debug_assert!(packet.len() >= 4);
    let mut raw = PacketHeader::from_bytes([packet[0], packet[1], packet[2], packet[3]]);
    raw.set_tsc(ScramblingControl::NotScrambled);
    let bytes = raw.into_bytes();
    packet[0..4].copy_from_slice(&bytes);
}
