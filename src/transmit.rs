//! Frame transmission and the MTU guard.

use std::fs;

use async_trait::async_trait;
use pnet::datalink::{self, Channel, DataLinkSender, NetworkInterface};
use tracing::{debug, info};

use crate::capture::find_interface;
use crate::error::Error;
use crate::target::FrameBuilder;
use crate::types::{MacAddr, Timestamp};
use crate::Result;

/// Used when the interface MTU cannot be read
pub const DEFAULT_MTU: usize = 1500;

/// Destination of generated frames
#[async_trait]
pub trait FrameSink: Send {
    /// Transmits one frame immediately.
    async fn send_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Transmits frames back-to-back, without delay between them.
    async fn send_batch(&mut self, frames: &[Vec<u8>]) -> Result<()> {
        for frame in frames {
            self.send_frame(frame).await?;
        }
        Ok(())
    }
}

/// Raw Ethernet sender on a named interface
pub struct PnetSink {
    tx: Box<dyn DataLinkSender>,
    interface: String,
}

impl PnetSink {
    pub fn open(interface: &str) -> Result<Self> {
        let iface = find_interface(interface)?;
        let tx = match datalink::channel(&iface, Default::default()) {
            Ok(Channel::Ethernet(tx, _)) => tx,
            Ok(_) => return Err(Error::transmit("unsupported datalink channel type")),
            Err(e) => {
                return Err(Error::transmit(format!(
                    "failed to open {}: {}",
                    interface, e
                )))
            }
        };
        info!(interface, "transmit channel open");
        Ok(PnetSink {
            tx,
            interface: interface.to_string(),
        })
    }
}

#[async_trait]
impl FrameSink for PnetSink {
    async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.tx
            .send_to(frame, None)
            .ok_or_else(|| Error::transmit(format!("{}: send queue unavailable", self.interface)))?
            .map_err(|e| Error::transmit(format!("{}: {}", self.interface, e)))
    }
}

/// Hardware address of an interface, if it has one
pub fn interface_mac(iface: &NetworkInterface) -> Option<MacAddr> {
    iface
        .mac
        .map(|mac| MacAddr([mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]))
}

/// MTU from `/sys/class/net/<iface>/mtu`, [`DEFAULT_MTU`] if unreadable.
pub fn interface_mtu(interface: &str) -> usize {
    fs::read_to_string(format!("/sys/class/net/{}/mtu", interface))
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .unwrap_or(DEFAULT_MTU)
}

/// Largest allData that keeps a frame of this builder within `mtu`.
///
/// The framing overhead is measured on a probe frame (stNum 1, sqNum 0).
pub fn max_all_data_len(builder: &FrameBuilder, mtu: usize) -> usize {
    let probe = builder.build_at(1, 0, false, Timestamp::default());
    let overhead = probe.len() - builder.profile().all_data.len();
    mtu.saturating_sub(overhead)
}

/// # Errors
/// [`Error::FrameTooLarge`] if the configured allData does not fit `mtu`.
pub fn check_frame_fits(builder: &FrameBuilder, mtu: usize) -> Result<()> {
    let all_data = builder.profile().all_data.len();
    let limit = max_all_data_len(builder, mtu);
    debug!(all_data, limit, mtu, "MTU check");
    if all_data > limit {
        return Err(Error::FrameTooLarge { all_data, limit });
    }
    Ok(())
}
