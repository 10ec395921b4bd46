use crate::encode_basics::*;
use crate::ethernet::encode_ethernet_frame;
use crate::types::*;

/// Encodes the GOOSE PDU fields (without the outer 0x61 sequence) in their fixed order.
fn encode_goose_fields(pdu: &GoosePdu, buffer: &mut Vec<u8>) {
    // [80] goCbRef (VisibleString)
    encode_string(TAG_GO_CB_REF, &pdu.go_cb_ref, buffer);

    // [81] timeAllowedToLive (Unsigned)
    encode_unsigned_integer(TAG_TIME_ALLOWED_TO_LIVE, pdu.time_allowed_to_live, buffer);

    // [82] datSet (VisibleString)
    encode_string(TAG_DAT_SET, &pdu.dat_set, buffer);

    // [83] goID (VisibleString)
    encode_string(TAG_GO_ID, &pdu.go_id, buffer);

    // [84] t (UtcTime, 8 bytes)
    encode_octet_string(TAG_T, &pdu.t.to_bytes(), buffer);

    // [85] stNum (Unsigned)
    encode_unsigned_integer(TAG_ST_NUM, pdu.st_num, buffer);

    // [86] sqNum (Unsigned)
    encode_unsigned_integer(TAG_SQ_NUM, pdu.sq_num, buffer);

    // [87] simulation (Boolean)
    encode_boolean(TAG_SIMULATION, pdu.simulation, buffer);

    // [88] confRev (Unsigned)
    encode_unsigned_integer(TAG_CONF_REV, pdu.conf_rev, buffer);

    // [89] ndsCom (Boolean)
    encode_boolean(TAG_NDS_COM, pdu.nds_com, buffer);

    // [8a] numDataSetEntries (Unsigned)
    encode_unsigned_integer(TAG_NUM_DAT_SET_ENTRIES, pdu.num_dat_set_entries, buffer);

    // [ab] allData, copied as opaque BER content
    encode_octet_string(TAG_ALL_DATA, &pdu.all_data, buffer);
}

/// Serializes a GOOSE PDU as the 0x61 sequence TLV.
pub fn encode_goose_pdu(pdu: &GoosePdu) -> Vec<u8> {
    let mut fields = Vec::with_capacity(96 + pdu.all_data.len());
    encode_goose_fields(pdu, &mut fields);
    encode_tlv(TAG_GOOSE_PDU, &fields)
}

/// Serializes a GOOSE PDU and prefixes the application header.
///
/// # Parameters
/// - `appid`: Application identifier written to the header.
/// - `pdu`: The PDU fields.
///
/// # Returns
/// `APPID ‖ Length ‖ Reserved 1 ‖ Reserved 2 ‖ PDU` where Length = PDU length + 8.
///
/// Length is a 16-bit field: payloads above 65535 bytes get Length `0xFFFF`.
/// Such payloads cannot be sent on any Ethernet link (see
/// [`crate::transmit::check_frame_fits`]).
pub fn encode_goose_payload(appid: u16, pdu: &GoosePdu) -> Vec<u8> {
    let pdu_bytes = encode_goose_pdu(pdu);
    let length = u16::try_from(pdu_bytes.len() + GOOSE_HEADER_LEN).unwrap_or(u16::MAX);

    let mut payload = Vec::with_capacity(GOOSE_HEADER_LEN + pdu_bytes.len());
    // APPID (2 bytes)
    payload.extend_from_slice(&appid.to_be_bytes());
    // Length (2 bytes)
    payload.extend_from_slice(&length.to_be_bytes());
    // Reserved 1 and Reserved 2 (2 bytes each, set to 0)
    payload.extend_from_slice(&[0; 4]);
    payload.extend_from_slice(&pdu_bytes);
    payload
}

/// Builds a complete, transmittable GOOSE Ethernet frame.
pub fn encode_goose_frame(
    dst_addr: &MacAddr,
    src_addr: &MacAddr,
    vlan: Option<VlanTag>,
    appid: u16,
    pdu: &GoosePdu,
) -> Vec<u8> {
    let payload = encode_goose_payload(appid, pdu);
    encode_ethernet_frame(dst_addr, src_addr, &payload, vlan)
}

/// Returns a copy of `raw` with every byte at `offsets` replaced by `marker`.
///
/// # Panics
/// If an offset lies outside `raw`. Offsets come from the target profile, which
/// is validated at load time, so an out-of-range offset is a programming error.
pub fn patch_all_data(raw: &[u8], offsets: &[usize], marker: u8) -> Vec<u8> {
    let mut patched = raw.to_vec();
    for &offset in offsets {
        assert!(
            offset < patched.len(),
            "allData offset {} outside payload of {} bytes",
            offset,
            patched.len()
        );
        patched[offset] = marker;
    }
    patched
}
