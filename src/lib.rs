//! IEC 61850-8-1 GOOSE codec, capture engine and traffic generator.

pub mod attack_sequence;
pub mod capture;
pub mod decode_basics;
pub mod decode_goose;
pub mod encode_basics;
pub mod encode_goose;
pub mod error;
pub mod ethernet;
pub mod event_sink;
pub mod event_table;
pub mod filter;
pub mod generator;
pub mod pcap_writer;
pub mod replay;
pub mod sniffer;
pub mod target;
pub mod tools;
pub mod transmit;
pub mod types;

pub use error::{Error, Result};
