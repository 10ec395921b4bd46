use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// EtherType of IEC 61850-8-1 GOOSE
pub const GOOSE_ETHER_TYPE: u16 = 0x88b8;
/// EtherType of IEC 61850-8-1 GSE management, also accepted as GOOSE framing
pub const GSE_MGMT_ETHER_TYPE: u16 = 0x88b9;
/// EtherType (TPID) of an IEEE 802.1Q tag
pub const VLAN_ETHER_TYPE: u16 = 0x8100;
/// APPID + Length + Reserved 1 + Reserved 2
pub const GOOSE_HEADER_LEN: usize = 8;

// GOOSE PDU tags (IEC 61850-8-1 Annex A)
pub const TAG_GOOSE_PDU: u8 = 0x61;
pub const TAG_GO_CB_REF: u8 = 0x80;
pub const TAG_TIME_ALLOWED_TO_LIVE: u8 = 0x81;
pub const TAG_DAT_SET: u8 = 0x82;
pub const TAG_GO_ID: u8 = 0x83;
pub const TAG_T: u8 = 0x84;
pub const TAG_ST_NUM: u8 = 0x85;
pub const TAG_SQ_NUM: u8 = 0x86;
pub const TAG_SIMULATION: u8 = 0x87;
pub const TAG_CONF_REV: u8 = 0x88;
pub const TAG_NDS_COM: u8 = 0x89;
pub const TAG_NUM_DAT_SET_ENTRIES: u8 = 0x8a;
pub const TAG_ALL_DATA: u8 = 0xab;

/// Ethernet hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = String;

    /// Accepts `01:0C:CD:01:00:01` and `01-0c-cd-01-00-01`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(|c| c == ':' || c == '-');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| format!("MAC address '{}' has fewer than 6 octets", s))?;
            if part.len() != 2 {
                return Err(format!("invalid octet '{}' in MAC address '{}'", part, s));
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| format!("invalid octet '{}' in MAC address '{}'", part, s))?;
        }
        if parts.next().is_some() {
            return Err(format!("MAC address '{}' has more than 6 octets", s));
        }
        Ok(MacAddr(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

/// IEEE 802.1Q tag control information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanTag {
    /// VLAN identifier (12 bits)
    pub id: u16,
    /// Priority code point (3 bits)
    pub priority: u8,
}

impl VlanTag {
    pub fn new(id: u16, priority: u8) -> Self {
        VlanTag { id, priority }
    }

    /// Packs priority, CFI (always 0) and VLAN ID into the 16-bit TCI
    pub fn tci(&self) -> u16 {
        ((self.priority as u16 & 0x07) << 13) | (self.id & 0x0fff)
    }

    pub fn from_tci(tci: u16) -> Self {
        VlanTag {
            id: tci & 0x0fff,
            priority: (tci >> 13) as u8,
        }
    }
}

/// Time quality flags according to IEC 61850-7-2 Table 30
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TimeQuality {
    pub leap_second_known: bool,
    pub clock_failure: bool,
    pub clock_not_synchronized: bool,
    pub time_accuracy: u8, // 5 bits (0-31)
}

impl TimeQuality {
    pub fn from_byte(byte: u8) -> Self {
        TimeQuality {
            leap_second_known: (byte & 0x80) != 0,
            clock_failure: (byte & 0x40) != 0,
            clock_not_synchronized: (byte & 0x20) != 0,
            time_accuracy: byte & 0x1F,
        }
    }

    pub fn to_byte(&self) -> u8 {
        let mut byte = 0u8;
        if self.leap_second_known {
            byte |= 0x80;
        }
        if self.clock_failure {
            byte |= 0x40;
        }
        if self.clock_not_synchronized {
            byte |= 0x20;
        }
        byte |= self.time_accuracy & 0x1F;
        byte
    }
}

/// IEC 61850 UtcTime - 8 bytes
/// Bytes 0-3: Seconds since epoch (Jan 1, 1970)
/// Bytes 4-6: Fraction of second (24 bits)
/// Byte 7: Time quality flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since Unix epoch
    pub seconds: u32,

    /// Fraction of second (0-16777215, representing 24-bit precision)
    pub fraction: u32,

    /// Time quality flags
    pub quality: TimeQuality,
}

impl Timestamp {
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Timestamp {
            seconds: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            fraction: u32::from_be_bytes([0, bytes[4], bytes[5], bytes[6]]),
            quality: TimeQuality::from_byte(bytes[7]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[0..4].copy_from_slice(&self.seconds.to_be_bytes());
        bytes[4..7].copy_from_slice(&self.fraction.to_be_bytes()[1..4]);
        bytes[7] = self.quality.to_byte();
        bytes
    }

    /// Current wall-clock time with an all-zero quality byte
    pub fn now() -> Self {
        Self::from_datetime(&Utc::now())
    }

    pub fn from_datetime(time: &DateTime<Utc>) -> Self {
        let fraction = ((time.timestamp_subsec_nanos() as u64) << 24) / 1_000_000_000;
        Timestamp {
            seconds: time.timestamp() as u32,
            fraction: (fraction as u32).min(0x00ff_ffff),
            quality: TimeQuality::default(),
        }
    }

    /// Converts 24-bit fraction to nanoseconds
    pub fn fraction_as_nanos(&self) -> u32 {
        ((self.fraction as u64 * 1_000_000_000) >> 24) as u32
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.seconds as i64, self.fraction_as_nanos())
            .single()
    }

    /// ISO 8601 rendering, e.g. "2024-10-28T14:30:45.123456Z"
    pub fn to_utc_string(&self) -> String {
        match self.to_datetime() {
            Some(time) => time.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            None => String::new(),
        }
    }
}

/// Fixed header preceding every GOOSE PDU on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GooseHeader {
    pub appid: u16,
    /** Length of header plus PDU */
    pub length: u16,
    pub reserved1: u16,
    pub reserved2: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoosePdu {
    /** Reference to GOOSE control block in the data model of the sending IED */
    pub go_cb_ref: String,
    /** Time allowed to live until the next GOOSE packet, in milliseconds */
    pub time_allowed_to_live: u32,
    /** Reference to the data set the GOOSE is shipping */
    pub dat_set: String,
    /** GOOSE ID as defined in GSEControl.appID */
    pub go_id: String,
    /** Time stamp of the last state change */
    pub t: Timestamp,
    /** State number - increments on every data change */
    pub st_num: u32,
    /** Sequence number - increments on every retransmission of the same state */
    pub sq_num: u32,
    /** Whether the GOOSE is simulated (test flag) */
    pub simulation: bool,
    /** Configuration revision of the GOOSE control block */
    pub conf_rev: u32,
    /** Whether the GOOSE needs commissioning */
    pub nds_com: bool,
    /** Number of data set entries in the GOOSE */
    pub num_dat_set_entries: u32,
    /** Raw BER content of allData, kept opaque */
    #[serde(with = "hex::serde")]
    pub all_data: Vec<u8>,
}

/// A GOOSE frame as seen on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GooseFrame {
    pub dst_addr: MacAddr,
    pub src_addr: MacAddr,
    pub vlan: Option<VlanTag>,
    pub header: GooseHeader,
    pub pdu: GoosePdu,
}

/// Typed view of one allData element, used for inspection only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum IECData {
    Array(Vec<IECData>),
    Structure(Vec<IECData>),
    Boolean(bool),
    /// Bit string as binary digits, e.g. "0000000000001000"
    BitString(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Octet string (hex encoded)
    OctetString(String),
    VisibleString(String),
    MmsString(String),
    Timestamp(Timestamp),
    /// Element with a tag outside the MMS Data choice, hex encoded
    Unknown { tag: u8, value: String },
}

/// Errors raised while decoding TLVs, PDUs and frames
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed TLV at offset {offset}: {reason}")]
    MalformedTlv { offset: usize, reason: String },

    #[error("truncated PDU: {declared} bytes declared, {available} available")]
    TruncatedPdu { declared: usize, available: usize },

    #[error("trailing bytes at offset {offset}: block needs {needed} bytes, {remaining} remain")]
    TrailingBytes {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("not a GOOSE frame (EtherType 0x{ether_type:04x})")]
    NotGoose { ether_type: u16 },

    #[error("unexpected tag 0x{found:02x} at offset {offset}, expected 0x{expected:02x}")]
    UnexpectedTag {
        expected: u8,
        found: u8,
        offset: usize,
    },
}

impl DecodeError {
    pub fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        DecodeError::MalformedTlv {
            offset,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod timestamp_tests {
    use super::*;

    #[test]
    fn test_timestamp_from_bytes() {
        let bytes = [0x65, 0x4a, 0x2c, 0x80, 0x12, 0x34, 0x56, 0x0A];
        let timestamp = Timestamp::from_bytes(bytes);

        assert_eq!(timestamp.seconds, 0x654a2c80);
        assert_eq!(timestamp.fraction, 0x123456);
        assert_eq!(timestamp.quality.time_accuracy, 10);
        assert_eq!(timestamp.to_bytes(), bytes);
    }

    #[test]
    fn test_timestamp_fraction_as_nanos() {
        let timestamp = Timestamp {
            seconds: 1000,
            fraction: 8388608, // 1/2 of 2^24
            quality: TimeQuality::default(),
        };
        let nanos = timestamp.fraction_as_nanos();
        assert!((nanos as i64 - 500_000_000).abs() < 100);
    }

    #[test]
    fn test_timestamp_from_datetime() {
        let time = Utc.timestamp_opt(1698502245, 500_000_000).unwrap();
        let timestamp = Timestamp::from_datetime(&time);
        assert_eq!(timestamp.seconds, 1698502245);
        assert_eq!(timestamp.fraction, 0x800000);
        assert_eq!(timestamp.to_bytes()[7], 0);
    }

    #[test]
    fn test_timestamp_utc_string_format() {
        let timestamp = Timestamp {
            seconds: 1698502245,
            fraction: 0,
            quality: TimeQuality::default(),
        };
        assert_eq!(timestamp.to_utc_string(), "2023-10-28T14:10:45.000000Z");
    }

    #[test]
    fn test_time_quality_roundtrip() {
        for byte in 0u8..=255 {
            assert_eq!(TimeQuality::from_byte(byte).to_byte(), byte);
        }
    }
}

#[cfg(test)]
mod address_tests {
    use super::*;

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "01:0C:CD:01:00:01".parse().unwrap();
        assert_eq!(mac.0, [0x01, 0x0c, 0xcd, 0x01, 0x00, 0x01]);
        assert_eq!(mac.to_string(), "01:0c:cd:01:00:01");

        let dashed: MacAddr = "00-e0-4c-94-2b-b3".parse().unwrap();
        assert_eq!(dashed.0, [0x00, 0xe0, 0x4c, 0x94, 0x2b, 0xb3]);
    }

    #[test]
    fn test_mac_parse_rejects_bad_input() {
        assert!("01:0c:cd:01:00".parse::<MacAddr>().is_err());
        assert!("01:0c:cd:01:00:01:02".parse::<MacAddr>().is_err());
        assert!("01:0c:cd:01:00:zz".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_vlan_tci() {
        let tag = VlanTag::new(1, 4);
        assert_eq!(tag.tci(), 0x8001);
        assert_eq!(VlanTag::from_tci(0x8001), tag);
        assert_eq!(VlanTag::new(0x0fff, 7).tci(), 0xffff);
    }
}
