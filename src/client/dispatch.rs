//! Classify incoming frames.
//!
//! Every frame is first tried as a [`WireMessage`]. Binary frames that are not JSON are
//! raw audio; text frames that are not a known message are reported as unparseable and
//! never raise.

use crate::protocol::WireMessage;

/// What an incoming frame turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Structured(WireMessage),
    RawAudio(Vec<u8>),
    Unparseable(String),
}

pub fn decode_text(text: &str) -> Inbound {
    match WireMessage::from_json(text) {
        Ok(message) => Inbound::Structured(message),
        Err(err) => Inbound::Unparseable(format!("{} ({} chars)", err, text.len())),
    }
}

pub fn decode_binary(bytes: Vec<u8>) -> Inbound {
    let parsed = std::str::from_utf8(&bytes)
        .ok()
        .filter(|text| text.trim_start().starts_with('{'))
        .and_then(|text| WireMessage::from_json(text).ok());

    match parsed {
        Some(message) => Inbound::Structured(message),
        None if bytes.is_empty() => Inbound::Unparseable("empty binary frame".to_string()),
        None => Inbound::RawAudio(bytes),
    }
}
