//! Encode and decode ISO-TP protocol control information.

use core::time::Duration;
use embedded_can::{Frame, Id};

use crate::config::{CLASSIC_FRAME_LEN, MAX_MESSAGE_LEN};

/// Largest CAN FD payload.
pub const MAX_FRAME_LEN: usize = 64;

/// Flow control status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    /// Clear to send more consecutive frames.
    ClearToSend,
    /// Wait before resuming.
    Wait,
    /// Abort due to overflow.
    Overflow,
}

impl FlowStatus {
    fn nibble(self) -> u8 {
        match self {
            FlowStatus::ClearToSend => 0x0,
            FlowStatus::Wait => 0x1,
            FlowStatus::Overflow => 0x2,
        }
    }
}

/// Frame type carried in the upper nibble of the first PCI byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// `0x0`
    Single,
    /// `0x1`
    First,
    /// `0x2`
    Consecutive,
    /// `0x3`
    FlowControl,
}

impl FrameType {
    /// Classify a frame from its first payload byte; `None` for reserved types.
    pub fn from_pci(byte: u8) -> Option<Self> {
        match byte >> 4 {
            0x0 => Some(FrameType::Single),
            0x1 => Some(FrameType::First),
            0x2 => Some(FrameType::Consecutive),
            0x3 => Some(FrameType::FlowControl),
            _ => None,
        }
    }
}

/// Parsed ISO-TP Protocol Data Unit (PDU).
///
/// This enum is used by the encoder/decoder and by the send/receive state machines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu<'a> {
    /// Single Frame payload.
    SingleFrame { len: u8, data: &'a [u8] },
    /// First Frame with total length and first bytes.
    FirstFrame { len: u16, data: &'a [u8] },
    /// Consecutive Frame carrying sequence and bytes.
    ConsecutiveFrame { sn: u8, data: &'a [u8] },
    /// Flow Control feedback.
    FlowControl {
        /// Flow status from receiver to sender.
        status: FlowStatus,
        /// Block size requested by receiver (0 = unlimited).
        block_size: u8,
        /// STmin (encoded byte form, not a `Duration`).
        st_min: u8,
    },
}

/// Reasons a payload cannot be decoded, or a PDU cannot be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduError {
    /// Payload shorter than its PCI announces, reserved frame type, or bad length field.
    Malformed,
    /// FlowControl frame whose status nibble is not 0, 1 or 2.
    InvalidFlowStatus(u8),
    /// PDU does not fit the requested frame length.
    DoesNotFit,
}

/// Serialise `pdu` into `buf`, returning the number of bytes used.
///
/// With `padding = Some(b)` the unused tail up to `frame_len` is filled with `b` and the full
/// `frame_len` is reported as used.
pub fn encode_into(
    buf: &mut [u8; MAX_FRAME_LEN],
    pdu: &Pdu<'_>,
    padding: Option<u8>,
    frame_len: usize,
) -> Result<usize, PduError> {
    if !(CLASSIC_FRAME_LEN..=MAX_FRAME_LEN).contains(&frame_len) {
        return Err(PduError::DoesNotFit);
    }

    let used = match pdu {
        Pdu::SingleFrame { len, data } => {
            let payload_len = *len as usize;
            if payload_len > data.len() {
                return Err(PduError::DoesNotFit);
            }
            if payload_len < CLASSIC_FRAME_LEN {
                buf[0] = *len & 0x0F;
                buf[1..1 + payload_len].copy_from_slice(&data[..payload_len]);
                1 + payload_len
            } else {
                // CAN FD escape: SF_DL nibble 0, length in the next byte.
                let needed = 2 + payload_len;
                if needed > frame_len {
                    return Err(PduError::DoesNotFit);
                }
                buf[0] = 0x00;
                buf[1] = *len;
                buf[2..needed].copy_from_slice(&data[..payload_len]);
                needed
            }
        }
        Pdu::FirstFrame { len, data } => {
            if *len as usize > MAX_MESSAGE_LEN || data.is_empty() {
                return Err(PduError::DoesNotFit);
            }
            buf[0] = 0x10 | ((*len >> 8) as u8 & 0x0F);
            buf[1] = (*len & 0xFF) as u8;
            let data_len = data.len().min(frame_len - 2);
            buf[2..2 + data_len].copy_from_slice(&data[..data_len]);
            2 + data_len
        }
        Pdu::ConsecutiveFrame { sn, data } => {
            if data.len() > frame_len - 1 {
                return Err(PduError::DoesNotFit);
            }
            buf[0] = 0x20 | (*sn & 0x0F);
            buf[1..1 + data.len()].copy_from_slice(data);
            1 + data.len()
        }
        Pdu::FlowControl {
            status,
            block_size,
            st_min,
        } => {
            buf[0] = 0x30 | status.nibble();
            buf[1] = *block_size;
            buf[2] = *st_min;
            3
        }
    };

    match padding {
        Some(pad) => {
            buf[used..frame_len].fill(pad);
            Ok(frame_len)
        }
        None => Ok(used),
    }
}

/// Build a CAN frame carrying `pdu`.
pub fn encode<F: Frame>(
    id: Id,
    pdu: &Pdu<'_>,
    padding: Option<u8>,
    frame_len: usize,
) -> Result<F, PduError> {
    let mut buf = [0u8; MAX_FRAME_LEN];
    let used = encode_into(&mut buf, pdu, padding, frame_len)?;
    F::new(id, &buf[..used]).ok_or(PduError::DoesNotFit)
}

/// Decode raw CAN data into a PDU view.
pub fn decode(data: &[u8]) -> Result<Pdu<'_>, PduError> {
    let Some(&pci) = data.first() else {
        return Err(PduError::Malformed);
    };
    match FrameType::from_pci(pci) {
        Some(FrameType::Single) => {
            let len = pci & 0x0F;
            if len == 0 && data.len() > CLASSIC_FRAME_LEN {
                let payload_len = *data.get(1).ok_or(PduError::Malformed)? as usize;
                let payload = data.get(2..2 + payload_len).ok_or(PduError::Malformed)?;
                Ok(Pdu::SingleFrame {
                    len: payload_len as u8,
                    data: payload,
                })
            } else {
                if len as usize >= CLASSIC_FRAME_LEN {
                    return Err(PduError::Malformed);
                }
                let payload = data.get(1..1 + len as usize).ok_or(PduError::Malformed)?;
                Ok(Pdu::SingleFrame { len, data: payload })
            }
        }
        Some(FrameType::First) => {
            if data.len() < 3 {
                return Err(PduError::Malformed);
            }
            let len = (u16::from(pci & 0x0F) << 8) | u16::from(data[1]);
            let max_sf = if data.len() > CLASSIC_FRAME_LEN {
                data.len() - 2
            } else {
                CLASSIC_FRAME_LEN - 1
            };
            if (len as usize) <= max_sf {
                return Err(PduError::Malformed);
            }
            Ok(Pdu::FirstFrame {
                len,
                data: &data[2..],
            })
        }
        Some(FrameType::Consecutive) => {
            if data.len() < 2 {
                return Err(PduError::Malformed);
            }
            Ok(Pdu::ConsecutiveFrame {
                sn: pci & 0x0F,
                data: &data[1..],
            })
        }
        Some(FrameType::FlowControl) => {
            if data.len() < 3 {
                return Err(PduError::Malformed);
            }
            let status = match pci & 0x0F {
                0x0 => FlowStatus::ClearToSend,
                0x1 => FlowStatus::Wait,
                0x2 => FlowStatus::Overflow,
                other => return Err(PduError::InvalidFlowStatus(other)),
            };
            Ok(Pdu::FlowControl {
                status,
                block_size: data[1],
                st_min: data[2],
            })
        }
        None => Err(PduError::Malformed),
    }
}

/// Convert STmin byte to a Duration, returning None for reserved values.
pub fn st_min_to_duration(raw: u8) -> Option<Duration> {
    match raw {
        0x00..=0x7F => Some(Duration::from_millis(u64::from(raw))),
        0xF1..=0xF9 => Some(Duration::from_micros(u64::from(raw - 0xF0) * 100)),
        _ => None,
    }
}

/// STmin to honour for a peer's FlowControl; reserved codes fall back to the 127 ms maximum.
pub fn peer_st_min(raw: u8) -> Duration {
    st_min_to_duration(raw).unwrap_or(Duration::from_millis(0x7F))
}

/// Encode a Duration into an STmin byte, clamping to the supported range.
pub fn duration_to_st_min(duration: Duration) -> u8 {
    let micros = duration.as_micros();
    if micros == 0 {
        return 0;
    }
    if micros <= 900 {
        // Sub-millisecond values round up to the next 100 µs step.
        return 0xF0 + micros.div_ceil(100) as u8;
    }
    duration.as_millis().clamp(1, 0x7F) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_can::StandardId;
    use embedded_can_mock::MockFrame;

    fn sid(id: u16) -> Id {
        Id::Standard(StandardId::new(id).unwrap())
    }

    #[test]
    fn single_frame_wire_layout() {
        let frame: MockFrame = encode(
            sid(0x123),
            &Pdu::SingleFrame {
                len: 3,
                data: &[0xAA, 0xBB, 0xCC],
            },
            None,
            8,
        )
        .unwrap();
        assert_eq!(frame.id(), sid(0x123));
        assert_eq!(frame.data(), &[0x03, 0xAA, 0xBB, 0xCC]);
        assert_eq!(
            decode(frame.data()).unwrap(),
            Pdu::SingleFrame {
                len: 3,
                data: &[0xAA, 0xBB, 0xCC]
            }
        );
    }

    #[test]
    fn first_frame_carries_twelve_bit_length_and_padding() {
        let payload = [0x11u8; 20];
        let frame: MockFrame = encode(
            sid(0x201),
            &Pdu::FirstFrame {
                len: 0x0ABC,
                data: &payload,
            },
            Some(0xCC),
            8,
        )
        .unwrap();
        assert_eq!(frame.data(), &[0x1A, 0xBC, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11]);
        match decode(frame.data()).unwrap() {
            Pdu::FirstFrame { len, data } => {
                assert_eq!(len, 0x0ABC);
                assert_eq!(data, &payload[..6]);
            }
            other => panic!("unexpected PDU {other:?}"),
        }
    }

    #[test]
    fn consecutive_frame_masks_sequence_number() {
        let frame: MockFrame = encode(
            sid(0x201),
            &Pdu::ConsecutiveFrame {
                sn: 0x1F,
                data: &[1, 2],
            },
            Some(0x00),
            8,
        )
        .unwrap();
        assert_eq!(frame.data(), &[0x2F, 1, 2, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn flow_control_layout() {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let used = encode_into(
            &mut buf,
            &Pdu::FlowControl {
                status: FlowStatus::Wait,
                block_size: 4,
                st_min: 0xF3,
            },
            None,
            8,
        )
        .unwrap();
        assert_eq!(&buf[..used], &[0x31, 0x04, 0xF3]);
    }

    #[test]
    fn decode_rejects_short_and_reserved_frames() {
        assert_eq!(decode(&[]), Err(PduError::Malformed));
        assert_eq!(decode(&[0x10, 0x20]), Err(PduError::Malformed));
        assert_eq!(decode(&[0x05, 1, 2]), Err(PduError::Malformed));
        assert_eq!(decode(&[0x40, 0, 0]), Err(PduError::Malformed));
        assert_eq!(decode(&[0x30, 0x00]), Err(PduError::Malformed));
        assert_eq!(decode(&[0x21]), Err(PduError::Malformed));
        assert_eq!(decode(&[0x35, 0, 0]), Err(PduError::InvalidFlowStatus(5)));
    }

    #[test]
    fn decode_rejects_first_frame_that_fits_single_frame() {
        assert_eq!(decode(&[0x10, 0x07, 1, 2, 3, 4, 5, 6]), Err(PduError::Malformed));
        assert!(decode(&[0x10, 0x08, 1, 2, 3, 4, 5, 6]).is_ok());
    }

    #[test]
    fn can_fd_single_frame_uses_escape_length() {
        let data = [0x5Au8; 20];
        let frame: MockFrame = encode(
            sid(0x300),
            &Pdu::SingleFrame { len: 20, data: &data },
            None,
            64,
        )
        .unwrap();
        assert_eq!(&frame.data()[..2], &[0x00, 20]);
        assert!(matches!(
            decode(frame.data()),
            Ok(Pdu::SingleFrame { len: 20, .. })
        ));
        assert_eq!(
            encode::<MockFrame>(sid(0x300), &Pdu::SingleFrame { len: 20, data: &data }, None, 8),
            Err(PduError::DoesNotFit)
        );
    }

    #[test]
    fn st_min_codes() {
        assert_eq!(st_min_to_duration(0x0A), Some(Duration::from_millis(10)));
        assert_eq!(st_min_to_duration(0xF1), Some(Duration::from_micros(100)));
        assert_eq!(st_min_to_duration(0xF9), Some(Duration::from_micros(900)));
        assert!(st_min_to_duration(0x80).is_none());
        assert!(st_min_to_duration(0xF0).is_none());
        assert_eq!(peer_st_min(0xFA), Duration::from_millis(127));

        assert_eq!(duration_to_st_min(Duration::ZERO), 0);
        assert_eq!(duration_to_st_min(Duration::from_micros(300)), 0xF3);
        assert_eq!(duration_to_st_min(Duration::from_micros(250)), 0xF3);
        assert_eq!(duration_to_st_min(Duration::from_micros(950)), 1);
        assert_eq!(duration_to_st_min(Duration::from_millis(20)), 20);
        assert_eq!(duration_to_st_min(Duration::from_secs(1)), 0x7F);
    }
}
