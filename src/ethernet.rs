use crate::types::*;

/// Destination MAC + source MAC
const ADDRESSES_LEN: usize = 12;

/// Ethernet addressing and the (optional) single 802.1Q tag around a GOOSE payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetPayload<'a> {
    pub dst_addr: MacAddr,
    pub src_addr: MacAddr,
    pub vlan: Option<VlanTag>,
    /// EtherType found after the addresses and optional tag
    pub ether_type: u16,
    /// GOOSE header followed by the PDU
    pub payload: &'a [u8],
}

/// Wraps a GOOSE payload (application header + PDU) into an Ethernet frame.
///
/// # Parameters
/// - `dst_addr`: Destination MAC address (usually a 01:0C:CD:01:xx:xx multicast).
/// - `src_addr`: Source MAC address.
/// - `payload`: GOOSE header followed by the PDU.
/// - `vlan`: When present an 802.1Q tag (0x8100 + TCI) precedes the GOOSE EtherType.
///
/// # Returns
/// The complete frame, without FCS.
pub fn encode_ethernet_frame(
    dst_addr: &MacAddr,
    src_addr: &MacAddr,
    payload: &[u8],
    vlan: Option<VlanTag>,
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ADDRESSES_LEN + 6 + payload.len());

    // Destination MAC address (6 bytes)
    frame.extend_from_slice(&dst_addr.octets());
    // Source MAC address (6 bytes)
    frame.extend_from_slice(&src_addr.octets());

    // VLAN tag (TPID and TCI) is optional
    if let Some(tag) = vlan {
        frame.extend_from_slice(&VLAN_ETHER_TYPE.to_be_bytes());
        frame.extend_from_slice(&tag.tci().to_be_bytes());
    }

    // EtherType is fixed to 0x88B8 for GOOSE
    frame.extend_from_slice(&GOOSE_ETHER_TYPE.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn read_u16(buffer: &[u8], pos: usize) -> Result<u16, DecodeError> {
    match buffer.get(pos..pos + 2) {
        Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
        None => Err(DecodeError::TrailingBytes {
            offset: pos,
            needed: 2,
            remaining: buffer.len().saturating_sub(pos),
        }),
    }
}

/// Splits an Ethernet frame into addressing, optional VLAN tag and GOOSE payload.
///
/// Only zero or one 802.1Q tag is parsed. A frame carrying a second tag is
/// reported as [`DecodeError::NotGoose`] with EtherType 0x8100; matching stacked
/// tags is the job of the capture filter.
///
/// # Errors
/// - [`DecodeError::TrailingBytes`] if the frame ends inside the Ethernet header.
/// - [`DecodeError::NotGoose`] if the EtherType is neither 0x88B8 nor 0x88B9.
pub fn decode_ethernet_frame(frame: &[u8]) -> Result<EthernetPayload<'_>, DecodeError> {
    if frame.len() < ADDRESSES_LEN {
        return Err(DecodeError::TrailingBytes {
            offset: 0,
            needed: ADDRESSES_LEN,
            remaining: frame.len(),
        });
    }
    let mut dst = [0u8; 6];
    let mut src = [0u8; 6];
    dst.copy_from_slice(&frame[0..6]);
    src.copy_from_slice(&frame[6..12]);

    let mut pos = ADDRESSES_LEN;
    let mut ether_type = read_u16(frame, pos)?;
    pos += 2;

    let mut vlan = None;
    if ether_type == VLAN_ETHER_TYPE {
        vlan = Some(VlanTag::from_tci(read_u16(frame, pos)?));
        pos += 2;
        ether_type = read_u16(frame, pos)?;
        pos += 2;
    }

    if ether_type != GOOSE_ETHER_TYPE && ether_type != GSE_MGMT_ETHER_TYPE {
        return Err(DecodeError::NotGoose { ether_type });
    }

    Ok(EthernetPayload {
        dst_addr: MacAddr(dst),
        src_addr: MacAddr(src),
        vlan,
        ether_type,
        payload: &frame[pos..],
    })
}

/// Checks whether the frame carries GOOSE (0x88b8 or 0x88b9) behind at most one VLAN tag.
pub fn is_goose_frame(frame: &[u8]) -> bool {
    decode_ethernet_frame(frame).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DST: MacAddr = MacAddr([0x01, 0x0c, 0xcd, 0x01, 0x00, 0x01]);
    const SRC: MacAddr = MacAddr([0x00, 0xe0, 0x4c, 0x94, 0x2b, 0xb3]);

    #[test]
    fn test_untagged_frame_layout() {
        let frame = encode_ethernet_frame(&DST, &SRC, &[0xaa, 0xbb], None);
        assert_eq!(frame.len(), 16);
        assert_eq!(&frame[12..14], &[0x88, 0xb8]);

        let decoded = decode_ethernet_frame(&frame).unwrap();
        assert_eq!(decoded.vlan, None);
        assert_eq!(decoded.payload, &[0xaa, 0xbb]);
        assert_eq!(decoded.src_addr, SRC);
    }

    #[test]
    fn test_tagged_frame_layout() {
        let frame = encode_ethernet_frame(&DST, &SRC, &[0x01], Some(VlanTag::new(1, 4)));
        assert_eq!(&frame[12..18], &[0x81, 0x00, 0x80, 0x01, 0x88, 0xb8]);

        let decoded = decode_ethernet_frame(&frame).unwrap();
        assert_eq!(decoded.vlan, Some(VlanTag::new(1, 4)));
        assert_eq!(decoded.payload, &[0x01]);
    }

    #[test]
    fn test_double_tagged_frame_is_left_to_filter() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&DST.octets());
        frame.extend_from_slice(&SRC.octets());
        frame.extend_from_slice(&[0x81, 0x00, 0x00, 0x0a, 0x81, 0x00, 0x00, 0x01, 0x88, 0xb8]);

        assert_eq!(
            decode_ethernet_frame(&frame),
            Err(DecodeError::NotGoose { ether_type: 0x8100 })
        );
        assert!(!is_goose_frame(&frame));
    }

    #[test]
    fn test_other_ether_type_is_rejected() {
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&[0x08, 0x00, 0x45]);
        assert_eq!(
            decode_ethernet_frame(&frame),
            Err(DecodeError::NotGoose { ether_type: 0x0800 })
        );
    }

    #[test]
    fn test_short_frame() {
        assert!(matches!(
            decode_ethernet_frame(&[0u8; 13]),
            Err(DecodeError::TrailingBytes { offset: 12, .. })
        ));
    }
}
