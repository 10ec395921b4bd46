use goose_tools::{
    decode_goose::{decode_goose_frame, decode_goose_pdu, inspect_all_data},
    encode_goose::{encode_goose_frame, encode_goose_pdu},
    ethernet::is_goose_frame,
    types::{DecodeError, GoosePdu, IECData, MacAddr, Timestamp, VlanTag},
};

/// Tagged frame from a substation capture: VLAN 1, AppID 0x1001, 11 allData entries
const CAPTURED_FRAME: &[u8] = &[
    1, 12, 205, 1, 0, 1, 0, 26, 182, 3, 47, 28, 129, 0, 0, 1, 136, 184, 16, 1, 0, 140, 0, 0, 0, 0,
    97, 129, 129, 128, 17, 73, 69, 68, 49, 47, 76, 76, 78, 48, 36, 71, 79, 36, 103, 99, 98, 49,
    129, 2, 7, 208, 130, 18, 73, 69, 68, 49, 47, 76, 76, 78, 48, 36, 68, 65, 84, 65, 83, 69, 84,
    49, 131, 6, 71, 79, 79, 83, 69, 49, 132, 8, 32, 33, 6, 18, 10, 48, 0, 0, 133, 1, 1, 134, 1,
    42, 135, 1, 0, 136, 2, 0, 128, 137, 1, 0, 138, 1, 11, 171, 47, 134, 1, 1, 134, 2, 0, 128, 134,
    2, 0, 255, 134, 1, 127, 134, 1, 1, 134, 2, 0, 128, 134, 2, 0, 255, 131, 1, 255, 133, 4, 127,
    255, 255, 255, 133, 5, 0, 128, 0, 0, 0, 138, 4, 116, 101, 115, 116,
];

fn sample_pdu() -> GoosePdu {
    GoosePdu {
        go_cb_ref: "IEDA/LLN0$GO$healthA".to_string(),
        time_allowed_to_live: 2000,
        dat_set: "IEDA/LLN0$AnalogValues".to_string(),
        go_id: "IEDA/LLN0$GO$healthA".to_string(),
        t: Timestamp::from_bytes([0x66, 0x32, 0x2b, 0x95, 0x80, 0x00, 0x00, 0x00]),
        st_num: 300,
        sq_num: 70000,
        simulation: true,
        conf_rev: 0x80,
        nds_com: false,
        num_dat_set_entries: 2,
        all_data: hex::decode("8301018501198910fc30645075dc8d02ed780e4caca42e07").unwrap(),
    }
}

#[test]
fn test_decode_captured_frame() {
    let frame = decode_goose_frame(CAPTURED_FRAME).unwrap();

    assert_eq!(frame.dst_addr, MacAddr([0x01, 0x0c, 0xcd, 0x01, 0x00, 0x01]));
    assert_eq!(frame.src_addr, MacAddr([0x00, 0x1a, 0xb6, 0x03, 0x2f, 0x1c]));
    assert_eq!(frame.vlan, Some(VlanTag { id: 1, priority: 0 }));
    assert_eq!(frame.header.appid, 0x1001);
    assert_eq!(frame.header.length, 140);

    let pdu = frame.pdu;
    assert_eq!(pdu.go_cb_ref, "IED1/LLN0$GO$gcb1");
    assert_eq!(pdu.time_allowed_to_live, 2000);
    assert_eq!(pdu.dat_set, "IED1/LLN0$DATASET1");
    assert_eq!(pdu.go_id, "GOOSE1");
    assert_eq!(
        pdu.t.to_bytes(),
        [0x20, 0x21, 0x06, 0x12, 0x0A, 0x30, 0x00, 0x00]
    );
    assert_eq!(pdu.st_num, 1);
    assert_eq!(pdu.sq_num, 42);
    assert!(!pdu.simulation);
    assert_eq!(pdu.conf_rev, 128);
    assert!(!pdu.nds_com);
    assert_eq!(pdu.num_dat_set_entries, 11);
    assert_eq!(pdu.all_data.len(), 47);
}

#[test]
fn test_inspect_captured_all_data() {
    let pdu = decode_goose_frame(CAPTURED_FRAME).unwrap().pdu;
    let entries = inspect_all_data(&pdu.all_data).unwrap();
    let values: Vec<IECData> = entries.iter().map(|e| e.value.clone()).collect();

    assert_eq!(
        values,
        vec![
            IECData::UInt(1),
            IECData::UInt(0x80),
            IECData::UInt(0xff),
            IECData::UInt(0x7f),
            IECData::UInt(1),
            IECData::UInt(0x80),
            IECData::UInt(0xff),
            IECData::Boolean(true),
            IECData::Int(2147483647),
            IECData::Int(2147483648),
            IECData::VisibleString("test".to_string()),
        ]
    );
    assert_eq!(entries[0].offset, 0);
    assert_eq!(entries[0].value_offset, 2);
    assert_eq!(entries[7].tag, 0x83);
}

#[test]
fn test_inspect_reference_all_data() {
    let entries = inspect_all_data(&sample_pdu().all_data).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].value, IECData::Boolean(true));
    // The byte a trip patch overwrites
    assert_eq!(entries[0].value_offset, 2);
    assert_eq!(entries[1].value, IECData::Int(25));
    assert_eq!(
        entries[2].value,
        IECData::OctetString("fc30645075dc8d02ed780e4caca42e07".to_string())
    );
}

#[test]
fn test_pdu_round_trip() {
    let pdu = sample_pdu();
    assert_eq!(decode_goose_pdu(&encode_goose_pdu(&pdu)).unwrap(), pdu);
}

#[test]
fn test_frame_round_trip() {
    let pdu = sample_pdu();
    let dst = MacAddr([0x01, 0x0c, 0xcd, 0x01, 0x00, 0x01]);
    let src = MacAddr([0x00, 0xe0, 0x4c, 0x94, 0x2b, 0xb3]);
    let vlan = Some(VlanTag::new(1, 4));

    let raw = encode_goose_frame(&dst, &src, vlan, 0x03e8, &pdu);
    let frame = decode_goose_frame(&raw).unwrap();
    assert_eq!(frame.dst_addr, dst);
    assert_eq!(frame.src_addr, src);
    assert_eq!(frame.vlan, vlan);
    assert_eq!(frame.header.appid, 0x03e8);
    assert_eq!(frame.header.length as usize, raw.len() - 18);
    assert_eq!(frame.pdu, pdu);
}

#[test]
fn test_long_form_lengths_round_trip() {
    // Large allData pushes the outer sequence into the two-byte length form
    let pdu = GoosePdu {
        all_data: vec![0x83, 0x01, 0x00].repeat(100),
        ..sample_pdu()
    };
    let encoded = encode_goose_pdu(&pdu);
    assert_eq!(encoded[1], 0x82);
    assert_eq!(decode_goose_pdu(&encoded).unwrap(), pdu);
}

#[test]
fn test_unknown_tag_is_skipped() {
    let mut body = vec![0x80, 0x03, b'c', b'b', b'1'];
    body.extend_from_slice(&[0x9f, 0x02, 0xde, 0xad]);
    body.extend_from_slice(&[0x85, 0x01, 0x07]);
    let mut buf = vec![0x61, body.len() as u8];
    buf.extend_from_slice(&body);

    let pdu = decode_goose_pdu(&buf).unwrap();
    assert_eq!(pdu.go_cb_ref, "cb1");
    assert_eq!(pdu.st_num, 7);
}

#[test]
fn test_missing_fields_take_defaults() {
    let buf = [0x61, 0x03, 0x86, 0x01, 0x05];
    let pdu = decode_goose_pdu(&buf).unwrap();
    assert_eq!(pdu.sq_num, 5);
    assert_eq!(pdu.go_cb_ref, "");
    assert_eq!(pdu.st_num, 0);
    assert!(!pdu.simulation);
    assert!(pdu.all_data.is_empty());
}

#[test]
fn test_truncated_pdu() {
    let pdu = GoosePdu {
        st_num: 1,
        sq_num: 0,
        conf_rev: 1,
        ..sample_pdu()
    };
    let raw = encode_goose_pdu(&pdu);
    assert_eq!(raw.len(), 128);
    let err = decode_goose_pdu(&raw[..raw.len() - 10]).unwrap_err();
    assert_eq!(
        err,
        DecodeError::TruncatedPdu {
            declared: 126,
            available: 116
        }
    );
}

#[test]
fn test_truncated_frame_is_an_error() {
    assert!(decode_goose_frame(&CAPTURED_FRAME[..60]).is_err());
}

#[test]
fn test_non_goose_ether_type() {
    let mut frame = CAPTURED_FRAME.to_vec();
    frame[16] = 0x08;
    frame[17] = 0x00;
    assert_eq!(
        decode_goose_frame(&frame).unwrap_err(),
        DecodeError::NotGoose { ether_type: 0x0800 }
    );
}

#[test]
fn test_is_goose_frame() {
    // GOOSE EtherType without VLAN tag (0x88b8 at bytes 12-13)
    let mut buf = [0u8; 60];
    buf[12] = 0x88;
    buf[13] = 0xb8;
    assert!(is_goose_frame(&buf));

    // GOOSE behind one VLAN tag
    let mut buf = [0u8; 60];
    buf[12] = 0x81;
    buf[13] = 0x00;
    buf[16] = 0x88;
    buf[17] = 0xb8;
    assert!(is_goose_frame(&buf));

    // IPv4
    let mut buf = [0u8; 60];
    buf[12] = 0x08;
    buf[13] = 0x00;
    assert!(!is_goose_frame(&buf));

    assert!(!is_goose_frame(&[0u8; 10]));
}
