//! Protocol frame detection inside concatenated correction streams.
//!
//! The router does not care about the contents of a correction frame, only
//! about where it ends and which family it belongs to. [`FrameDetector`] is
//! the contract it consumes; [`ProtocolFrameDetector`] is the default
//! implementation recognising the framings found on correction links:
//!
//! | Leading bytes | Protocol | Hint |
//! |---------------|----------|------|
//! | `D3`          | RTCM 3   | [`FrameHint::Rtcm`] |
//! | `B5 62`       | UBX      | PMP / QZSS L6 / none by class+id |
//! | `73`          | SPARTN   | [`FrameHint::Spartn`] |
//! | `$`           | NMEA     | [`FrameHint::Text`] |

use serde::{Deserialize, Serialize};

/// Classification of a detected frame.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display,
)]
pub enum FrameHint {
    /// Nothing recognised, or a frame that carries no correction family.
    #[default]
    None,
    /// SPARTN frame (IP-delivered correction tunnel).
    Spartn,
    /// Proprietary multiplexed satellite payload (UBX RXM-PMP).
    ProprietaryMultiplexed,
    /// Vendor satellite-channel payload (UBX RXM-QZSSL6, CLAS).
    VendorSatellite,
    /// Plain RTCM 3.
    Rtcm,
    /// Plain text (NMEA).
    Text,
}

/// Where the frame starting at offset zero ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A complete frame of this many bytes.
    Frame(usize),
    /// A known preamble was seen but the frame is truncated.
    NeedMoreData,
    /// The leading bytes do not start any known frame.
    NotFound,
}

/// Result of a single [`FrameDetector::parse`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    /// Frame boundary information.
    pub outcome: FrameOutcome,
    /// Classification of the frame (meaningful only with a known preamble).
    pub hint: FrameHint,
}

impl Detection {
    fn frame(len: usize, hint: FrameHint) -> Self {
        Self {
            outcome: FrameOutcome::Frame(len),
            hint,
        }
    }

    fn need_more(hint: FrameHint) -> Self {
        Self {
            outcome: FrameOutcome::NeedMoreData,
            hint,
        }
    }

    fn not_found() -> Self {
        Self {
            outcome: FrameOutcome::NotFound,
            hint: FrameHint::None,
        }
    }
}

/// Finds the first protocol frame at the start of a byte slice.
pub trait FrameDetector: Send + Sync {
    /// Inspect `bytes` from offset zero.
    fn parse(&self, bytes: &[u8]) -> Detection;
}

// ---------------------------------------------------------------------------
// ProtocolFrameDetector
// ---------------------------------------------------------------------------

const RTCM_PREAMBLE: u8 = 0xD3;
const UBX_SYNC: [u8; 2] = [0xB5, 0x62];
const SPARTN_PREAMBLE: u8 = 0x73;
const NMEA_START: u8 = b'$';
const NMEA_MAX_LEN: usize = 100;

const UBX_CLASS_RXM: u8 = 0x02;
const UBX_ID_RXM_PMP: u8 = 0x72;
const UBX_ID_RXM_QZSSL6: u8 = 0x73;

/// Frame detector for RTCM 3, UBX, SPARTN and NMEA.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtocolFrameDetector;

impl FrameDetector for ProtocolFrameDetector {
    fn parse(&self, bytes: &[u8]) -> Detection {
        match bytes.first() {
            Some(&RTCM_PREAMBLE) => parse_rtcm(bytes),
            Some(&SPARTN_PREAMBLE) => parse_spartn(bytes),
            Some(&NMEA_START) => parse_nmea(bytes),
            Some(&b) if b == UBX_SYNC[0] => parse_ubx(bytes),
            _ => Detection::not_found(),
        }
    }
}

fn parse_rtcm(bytes: &[u8]) -> Detection {
    if bytes.len() < 3 {
        return Detection::need_more(FrameHint::Rtcm);
    }
    // Six reserved bits must be zero.
    if bytes[1] & 0xFC != 0 {
        return Detection::not_found();
    }
    let payload = (usize::from(bytes[1] & 0x03) << 8) | usize::from(bytes[2]);
    let total = 3 + payload + 3;
    if bytes.len() < total {
        return Detection::need_more(FrameHint::Rtcm);
    }
    let expected = crc24q(&bytes[..total - 3]);
    let found = (u32::from(bytes[total - 3]) << 16)
        | (u32::from(bytes[total - 2]) << 8)
        | u32::from(bytes[total - 1]);
    if expected != found {
        return Detection::not_found();
    }
    Detection::frame(total, FrameHint::Rtcm)
}

fn parse_ubx(bytes: &[u8]) -> Detection {
    if bytes.len() < 2 {
        return Detection::need_more(FrameHint::None);
    }
    if bytes[1] != UBX_SYNC[1] {
        return Detection::not_found();
    }
    if bytes.len() < 6 {
        return Detection::need_more(FrameHint::None);
    }
    let hint = match (bytes[2], bytes[3]) {
        (UBX_CLASS_RXM, UBX_ID_RXM_PMP) => FrameHint::ProprietaryMultiplexed,
        (UBX_CLASS_RXM, UBX_ID_RXM_QZSSL6) => FrameHint::VendorSatellite,
        _ => FrameHint::None,
    };
    let payload = usize::from(u16::from_le_bytes([bytes[4], bytes[5]]));
    let total = 6 + payload + 2;
    if bytes.len() < total {
        return Detection::need_more(hint);
    }
    let (ck_a, ck_b) = ubx_checksum(&bytes[2..6 + payload]);
    if ck_a != bytes[total - 2] || ck_b != bytes[total - 1] {
        return Detection::not_found();
    }
    Detection::frame(total, hint)
}

fn parse_spartn(bytes: &[u8]) -> Detection {
    if bytes.len() < 5 {
        return Detection::need_more(FrameHint::Spartn);
    }
    let message_type = bytes[1] >> 1;
    if message_type > 4 && message_type != 120 {
        return Detection::not_found();
    }
    let payload = (usize::from(bytes[1] & 0x01) << 9)
        | (usize::from(bytes[2]) << 1)
        | usize::from(bytes[3] >> 7);
    let encrypted = (bytes[3] >> 6) & 0x01 == 1;
    let crc_len = usize::from((bytes[3] >> 4) & 0x03) + 1;
    let long_time_tag = (bytes[4] >> 3) & 0x01 == 1;

    let mut header = 4 + if long_time_tag { 6 } else { 4 };
    let mut auth_len = 0;
    if encrypted {
        if bytes.len() < header + 2 {
            return Detection::need_more(FrameHint::Spartn);
        }
        let ext = bytes[header + 1];
        let auth_indicator = (ext >> 3) & 0x07;
        if auth_indicator > 1 {
            auth_len = match ext & 0x07 {
                0 => 8,
                1 => 12,
                2 => 16,
                3 => 32,
                4 => 64,
                _ => return Detection::not_found(),
            };
        }
        header += 2;
    }

    let total = header + payload + auth_len + crc_len;
    if bytes.len() < total {
        return Detection::need_more(FrameHint::Spartn);
    }
    Detection::frame(total, FrameHint::Spartn)
}

fn parse_nmea(bytes: &[u8]) -> Detection {
    let window = &bytes[..bytes.len().min(NMEA_MAX_LEN)];
    match window.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => Detection::frame(pos + 2, FrameHint::Text),
        None if bytes.len() >= NMEA_MAX_LEN => Detection::not_found(),
        None => Detection::need_more(FrameHint::Text),
    }
}

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// CRC-24Q as used by RTCM 3 (polynomial `0x1864CFB`, zero seed).
pub fn crc24q(data: &[u8]) -> u32 {
    let mut crc: u32 = 0;
    for &byte in data {
        crc ^= u32::from(byte) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= 0x0186_4CFB;
            }
        }
    }
    crc & 0x00FF_FFFF
}

/// UBX checksum (8-bit Fletcher) over class, id, length and payload.
pub fn ubx_checksum(data: &[u8]) -> (u8, u8) {
    let mut ck_a: u8 = 0;
    let mut ck_b: u8 = 0;
    for &byte in data {
        ck_a = ck_a.wrapping_add(byte);
        ck_b = ck_b.wrapping_add(ck_a);
    }
    (ck_a, ck_b)
}

/// Assemble a complete UBX frame (sync, header, payload, checksum).
pub fn ubx_frame(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let len = u16::try_from(payload.len()).unwrap_or(u16::MAX);
    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(&UBX_SYNC);
    frame.push(class);
    frame.push(id);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload[..usize::from(len)]);
    let (ck_a, ck_b) = ubx_checksum(&frame[2..]);
    frame.push(ck_a);
    frame.push(ck_b);
    frame
}

/// Assemble a complete RTCM 3 frame around `payload` (at most 1023 bytes).
pub fn rtcm_frame(payload: &[u8]) -> Vec<u8> {
    let len = payload.len().min(0x3FF);
    let mut frame = Vec::with_capacity(len + 6);
    frame.push(RTCM_PREAMBLE);
    #[allow(clippy::cast_possible_truncation)]
    {
        frame.push((len >> 8) as u8 & 0x03);
        frame.push(len as u8);
    }
    frame.extend_from_slice(&payload[..len]);
    let crc = crc24q(&frame).to_be_bytes();
    frame.extend_from_slice(&crc[1..]);
    frame
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Unencrypted SPARTN frame with a 16-bit time tag and 1-byte CRC.
    fn spartn_frame(message_type: u8, payload: usize) -> Vec<u8> {
        let mut frame = vec![
            SPARTN_PREAMBLE,
            (message_type << 1) | ((payload >> 9) as u8 & 0x01),
            (payload >> 1) as u8,
            ((payload & 0x01) as u8) << 7,
            0x00,
            0x00,
            0x00,
            0x00,
        ];
        frame.extend(std::iter::repeat(0xAA).take(payload));
        frame.push(0x55);
        frame
    }

    #[test]
    fn rtcm_frame_is_detected() {
        let frame = rtcm_frame(&[0x3E, 0xD0, 0x00, 0x03]);
        let d = ProtocolFrameDetector.parse(&frame);
        assert_eq!(d.outcome, FrameOutcome::Frame(frame.len()));
        assert_eq!(d.hint, FrameHint::Rtcm);
    }

    #[test]
    fn rtcm_bad_crc_is_not_found() {
        let mut frame = rtcm_frame(&[1, 2, 3]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert_eq!(
            ProtocolFrameDetector.parse(&frame).outcome,
            FrameOutcome::NotFound
        );
    }

    #[test]
    fn truncated_rtcm_needs_more() {
        let frame = rtcm_frame(&[1, 2, 3, 4, 5]);
        let d = ProtocolFrameDetector.parse(&frame[..6]);
        assert_eq!(d.outcome, FrameOutcome::NeedMoreData);
        assert_eq!(d.hint, FrameHint::Rtcm);
    }

    #[test]
    fn ubx_pmp_and_l6_hints() {
        let pmp = ubx_frame(0x02, 0x72, &[0u8; 16]);
        let l6 = ubx_frame(0x02, 0x73, &[0u8; 8]);
        let nav = ubx_frame(0x01, 0x07, &[0u8; 4]);

        let d = ProtocolFrameDetector.parse(&pmp);
        assert_eq!(d.outcome, FrameOutcome::Frame(pmp.len()));
        assert_eq!(d.hint, FrameHint::ProprietaryMultiplexed);
        assert_eq!(
            ProtocolFrameDetector.parse(&l6).hint,
            FrameHint::VendorSatellite
        );
        assert_eq!(ProtocolFrameDetector.parse(&nav).hint, FrameHint::None);
    }

    #[test]
    fn ubx_checksum_matches_reference() {
        // UBX-CFG-MSG enabling NMEA-GGA.
        let data = [0x06, 0x01, 0x03, 0x00, 0xF0, 0x00, 0x01];
        assert_eq!(ubx_checksum(&data), (0xFB, 0x10));
    }

    #[test]
    fn spartn_frame_length() {
        let frame = spartn_frame(1, 37);
        let d = ProtocolFrameDetector.parse(&frame);
        assert_eq!(d.outcome, FrameOutcome::Frame(frame.len()));
        assert_eq!(d.hint, FrameHint::Spartn);
    }

    #[test]
    fn spartn_with_large_payload_uses_high_bits() {
        let frame = spartn_frame(0, 700);
        assert_eq!(
            ProtocolFrameDetector.parse(&frame).outcome,
            FrameOutcome::Frame(frame.len())
        );
    }

    #[test]
    fn nmea_sentence_is_text() {
        let bytes = b"$GPGGA,1*00\r\n\xd3";
        let d = ProtocolFrameDetector.parse(bytes);
        assert_eq!(d.outcome, FrameOutcome::Frame(13));
        assert_eq!(d.hint, FrameHint::Text);
    }

    #[test]
    fn garbage_is_not_found() {
        assert_eq!(
            ProtocolFrameDetector.parse(&[0x00, 0x01]).outcome,
            FrameOutcome::NotFound
        );
        assert_eq!(
            ProtocolFrameDetector.parse(&[]).outcome,
            FrameOutcome::NotFound
        );
    }
}
