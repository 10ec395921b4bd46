//! Per-target constants of the generated traffic, loaded from JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::encode_goose::{encode_goose_frame, patch_all_data};
use crate::error::Error;
use crate::types::{GoosePdu, MacAddr, Timestamp, VlanTag};
use crate::Result;

/// allData of the reference publication: Boolean, INT32 25, 16-byte OctetString
const REFERENCE_ALL_DATA: [u8; 24] = [
    0x83, 0x01, 0x01, 0x85, 0x01, 0x19, 0x89, 0x10, 0xfc, 0x30, 0x64, 0x50, 0x75, 0xdc, 0x8d,
    0x02, 0xed, 0x78, 0x0e, 0x4c, 0xac, 0xa4, 0x2e, 0x07,
];

/// Addressing, identity and payload of the publication being imitated.
///
/// Every field has a default (the reference target), so a profile file only
/// needs the fields that differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetProfile {
    pub dst_mac: MacAddr,
    /// `None` uses the MAC of the sending interface
    pub src_mac: Option<MacAddr>,
    pub appid: u16,
    pub vlan_id: u16,
    pub vlan_priority: u8,
    pub conf_rev: u32,
    pub ttl_ms: u32,
    pub go_cb_ref: String,
    pub dat_set: String,
    pub go_id: String,
    pub num_dat_set_entries: u32,
    pub simulation: bool,
    pub nds_com: bool,
    /// Raw allData content, hex encoded in the file
    #[serde(with = "hex::serde")]
    pub all_data: Vec<u8>,
    /// Offsets within allData overwritten when the trip condition is asserted
    pub trip_offsets: Vec<usize>,
    /// Byte written at every trip offset
    pub trip_marker: u8,
}

impl Default for TargetProfile {
    fn default() -> Self {
        TargetProfile {
            dst_mac: MacAddr([0x01, 0x0c, 0xcd, 0x01, 0x00, 0x01]),
            src_mac: Some(MacAddr([0x00, 0xe0, 0x4c, 0x94, 0x2b, 0xb3])),
            appid: 0x03e8,
            vlan_id: 1,
            vlan_priority: 4,
            conf_rev: 1,
            ttl_ms: 2000,
            go_cb_ref: "IEDA/LLN0$GO$healthA".to_string(),
            dat_set: "IEDA/LLN0$AnalogValues".to_string(),
            go_id: "IEDA/LLN0$GO$healthA".to_string(),
            num_dat_set_entries: 2,
            simulation: false,
            nds_com: false,
            all_data: REFERENCE_ALL_DATA.to_vec(),
            trip_offsets: vec![2],
            trip_marker: 0x00,
        }
    }
}

impl TargetProfile {
    /// Reads and validates a JSON profile.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let profile: TargetProfile = serde_json::from_str(&text)?;
        profile.validate()?;
        debug!(path = %path.display(), appid = profile.appid, "loaded target profile");
        Ok(profile)
    }

    /// Rejects profiles that would produce invalid frames or patch outside allData.
    pub fn validate(&self) -> Result<()> {
        if self.vlan_id > 0x0fff {
            return Err(Error::config(format!(
                "vlan_id {} exceeds 12 bits",
                self.vlan_id
            )));
        }
        if self.vlan_priority > 7 {
            return Err(Error::config(format!(
                "vlan_priority {} exceeds 3 bits",
                self.vlan_priority
            )));
        }
        if let Some(offset) = self
            .trip_offsets
            .iter()
            .find(|&&offset| offset >= self.all_data.len())
        {
            return Err(Error::config(format!(
                "trip offset {} outside allData of {} bytes",
                offset,
                self.all_data.len()
            )));
        }
        Ok(())
    }

    /// 802.1Q tag to push, or `None` for an access port
    pub fn vlan(&self, untagged: bool) -> Option<VlanTag> {
        if untagged {
            None
        } else {
            Some(VlanTag::new(self.vlan_id, self.vlan_priority))
        }
    }
}

/// Builds frames for one target with variable counters and trip state
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    profile: TargetProfile,
    src_addr: MacAddr,
    vlan: Option<VlanTag>,
    tripped: Vec<u8>,
}

impl FrameBuilder {
    /// # Parameters
    /// - `profile`: A validated target profile.
    /// - `interface_mac`: Source address used when the profile has none.
    /// - `untagged`: Send raw EtherType 0x88B8 without 802.1Q tag.
    pub fn new(profile: TargetProfile, interface_mac: MacAddr, untagged: bool) -> Self {
        let tripped = patch_all_data(
            &profile.all_data,
            &profile.trip_offsets,
            profile.trip_marker,
        );
        FrameBuilder {
            src_addr: profile.src_mac.unwrap_or(interface_mac),
            vlan: profile.vlan(untagged),
            profile,
            tripped,
        }
    }

    pub fn profile(&self) -> &TargetProfile {
        &self.profile
    }

    pub fn src_addr(&self) -> MacAddr {
        self.src_addr
    }

    pub fn vlan(&self) -> Option<VlanTag> {
        self.vlan
    }

    /// PDU with the given counters; `trip` selects the patched allData.
    pub fn pdu(&self, st_num: u32, sq_num: u32, trip: bool, t: Timestamp) -> GoosePdu {
        let p = &self.profile;
        GoosePdu {
            go_cb_ref: p.go_cb_ref.clone(),
            time_allowed_to_live: p.ttl_ms,
            dat_set: p.dat_set.clone(),
            go_id: p.go_id.clone(),
            t,
            st_num,
            sq_num,
            simulation: p.simulation,
            conf_rev: p.conf_rev,
            nds_com: p.nds_com,
            num_dat_set_entries: p.num_dat_set_entries,
            all_data: if trip {
                self.tripped.clone()
            } else {
                p.all_data.clone()
            },
        }
    }

    pub fn build_at(&self, st_num: u32, sq_num: u32, trip: bool, t: Timestamp) -> Vec<u8> {
        let pdu = self.pdu(st_num, sq_num, trip, t);
        encode_goose_frame(
            &self.profile.dst_mac,
            &self.src_addr,
            self.vlan,
            self.profile.appid,
            &pdu,
        )
    }

    /// Frame stamped with the current wall-clock time
    pub fn build(&self, st_num: u32, sq_num: u32, trip: bool) -> Vec<u8> {
        self.build_at(st_num, sq_num, trip, Timestamp::now())
    }
}
