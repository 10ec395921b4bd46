use crate::decode_basics::*;
use crate::ethernet::decode_ethernet_frame;
use crate::types::*;

/// Decodes the 8-byte GOOSE application header.
///
/// # Errors
/// [`DecodeError::TruncatedPdu`] if fewer than 8 bytes are available.
pub fn decode_goose_header(buffer: &[u8]) -> Result<GooseHeader, DecodeError> {
    if buffer.len() < GOOSE_HEADER_LEN {
        return Err(DecodeError::TruncatedPdu {
            declared: GOOSE_HEADER_LEN,
            available: buffer.len(),
        });
    }
    let word = |i: usize| u16::from_be_bytes([buffer[i], buffer[i + 1]]);
    Ok(GooseHeader {
        appid: word(0),
        length: word(2),
        reserved1: word(4),
        reserved2: word(6),
    })
}

/// Decodes a GOOSE PDU starting with its 0x61 sequence tag.
///
/// Fields are matched by tag, so unknown tags are skipped and absent fields keep
/// their default (empty string, 0, false). Bytes following the sequence are
/// ignored (Ethernet padding).
///
/// # Errors
/// - [`DecodeError::UnexpectedTag`] if the buffer does not start with 0x61.
/// - [`DecodeError::TruncatedPdu`] if the sequence declares more bytes than available.
/// - [`DecodeError::MalformedTlv`] / [`DecodeError::TrailingBytes`] for broken fields.
pub fn decode_goose_pdu(buffer: &[u8]) -> Result<GoosePdu, DecodeError> {
    let (tag, length, value_start) = decode_tag_length(buffer, 0)?;
    if tag != TAG_GOOSE_PDU {
        return Err(DecodeError::UnexpectedTag {
            expected: TAG_GOOSE_PDU,
            found: tag,
            offset: 0,
        });
    }
    let available = buffer.len() - value_start;
    if length > available {
        return Err(DecodeError::TruncatedPdu {
            declared: length,
            available,
        });
    }

    let body = &buffer[value_start..value_start + length];
    let mut pdu = GoosePdu::default();

    for tlv in TlvScanner::new(body) {
        let tlv = tlv?;
        let offset = value_start + tlv.value_offset;
        match tlv.tag {
            // [80] goCbRef
            TAG_GO_CB_REF => pdu.go_cb_ref = decode_string(tlv.value),
            // [81] timeAllowedToLive
            TAG_TIME_ALLOWED_TO_LIVE => {
                pdu.time_allowed_to_live = decode_unsigned_32(tlv.value, offset)?
            }
            // [82] datSet
            TAG_DAT_SET => pdu.dat_set = decode_string(tlv.value),
            // [83] goID
            TAG_GO_ID => pdu.go_id = decode_string(tlv.value),
            // [84] t
            TAG_T => {
                let bytes: [u8; 8] = tlv.value.try_into().map_err(|_| {
                    DecodeError::malformed(
                        offset,
                        format!("timestamp must be 8 bytes, got {}", tlv.value.len()),
                    )
                })?;
                pdu.t = Timestamp::from_bytes(bytes);
            }
            // [85] stNum
            TAG_ST_NUM => pdu.st_num = decode_unsigned_32(tlv.value, offset)?,
            // [86] sqNum
            TAG_SQ_NUM => pdu.sq_num = decode_unsigned_32(tlv.value, offset)?,
            // [87] simulation
            TAG_SIMULATION => pdu.simulation = decode_boolean(tlv.value),
            // [88] confRev
            TAG_CONF_REV => pdu.conf_rev = decode_unsigned_32(tlv.value, offset)?,
            // [89] ndsCom
            TAG_NDS_COM => pdu.nds_com = decode_boolean(tlv.value),
            // [8a] numDataSetEntries
            TAG_NUM_DAT_SET_ENTRIES => {
                pdu.num_dat_set_entries = decode_unsigned_32(tlv.value, offset)?
            }
            // [ab] allData
            TAG_ALL_DATA => pdu.all_data = tlv.value.to_vec(),
            _ => {}
        }
    }

    Ok(pdu)
}

/// Decodes application header and PDU.
///
/// The AppID is not checked; filtering by AppID is left to the caller.
pub fn decode_goose_payload(payload: &[u8]) -> Result<(GooseHeader, GoosePdu), DecodeError> {
    let header = decode_goose_header(payload)?;
    let pdu = decode_goose_pdu(&payload[GOOSE_HEADER_LEN..])?;
    Ok((header, pdu))
}

/// Decodes a complete GOOSE Ethernet frame from the buffer.
///
/// # Errors
/// [`DecodeError::NotGoose`] for non-GOOSE EtherTypes and stacked VLAN tags,
/// otherwise the errors of [`decode_goose_payload`].
pub fn decode_goose_frame(buffer: &[u8]) -> Result<GooseFrame, DecodeError> {
    let ethernet = decode_ethernet_frame(buffer)?;
    let (header, pdu) = decode_goose_payload(ethernet.payload)?;
    Ok(GooseFrame {
        dst_addr: ethernet.dst_addr,
        src_addr: ethernet.src_addr,
        vlan: ethernet.vlan,
        header,
        pdu,
    })
}

/// One top-level element of allData with its position in the raw payload
#[derive(Debug, Clone, PartialEq)]
pub struct DataEntry {
    /// Offset of the element's tag
    pub offset: usize,
    /// Offset of the element's first value byte, the position to patch
    pub value_offset: usize,
    pub tag: u8,
    pub value: IECData,
}

/// Lists the top-level elements of a raw allData payload.
pub fn inspect_all_data(raw: &[u8]) -> Result<Vec<DataEntry>, DecodeError> {
    TlvScanner::new(raw)
        .map(|tlv| {
            let tlv = tlv?;
            Ok(DataEntry {
                offset: tlv.offset,
                value_offset: tlv.value_offset,
                tag: tlv.tag,
                value: decode_iec_data(tlv.tag, tlv.value, tlv.value_offset)?,
            })
        })
        .collect()
}

/// Decodes one MMS Data element.
///
/// # Parameters
/// - `tag`: The MMS Data choice tag.
/// - `value`: The element content.
/// - `offset`: Position of `value` in the enclosing buffer, used in errors.
pub fn decode_iec_data(tag: u8, value: &[u8], offset: usize) -> Result<IECData, DecodeError> {
    let data = match tag {
        0xa1 | 0xa2 => {
            let mut children = Vec::new();
            for tlv in TlvScanner::new(value) {
                let tlv = tlv?;
                children.push(decode_iec_data(
                    tlv.tag,
                    tlv.value,
                    offset + tlv.value_offset,
                )?);
            }
            if tag == 0xa1 {
                IECData::Array(children)
            } else {
                IECData::Structure(children)
            }
        }
        0x83 => IECData::Boolean(decode_boolean(value)),
        0x84 => {
            // First byte holds the number of unused bits in the last octet
            let (padding, bits) = value
                .split_first()
                .ok_or_else(|| DecodeError::malformed(offset, "empty bit string"))?;
            let mut rendered: String = bits.iter().map(|b| format!("{:08b}", b)).collect();
            let keep = rendered.len().saturating_sub(*padding as usize);
            rendered.truncate(keep);
            IECData::BitString(rendered)
        }
        0x85 => IECData::Int(decode_integer_64(value, offset)?),
        0x86 => IECData::UInt(decode_integer_64(value, offset)? as u64),
        0x87 => match value.len() {
            // Exponent width byte followed by IEEE 754 single or double
            5 => IECData::Float(f32::from_be_bytes([value[1], value[2], value[3], value[4]]) as f64),
            9 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&value[1..9]);
                IECData::Float(f64::from_be_bytes(bytes))
            }
            n => {
                return Err(DecodeError::malformed(
                    offset,
                    format!("floating point of {} bytes", n),
                ))
            }
        },
        0x89 => IECData::OctetString(hex::encode(value)),
        0x8a => IECData::VisibleString(decode_string(value)),
        0x90 => IECData::MmsString(decode_string(value)),
        0x91 => {
            let bytes: [u8; 8] = value
                .try_into()
                .map_err(|_| DecodeError::malformed(offset, "utc-time must be 8 bytes"))?;
            IECData::Timestamp(Timestamp::from_bytes(bytes))
        }
        _ => IECData::Unknown {
            tag,
            value: hex::encode(value),
        },
    };
    Ok(data)
}
