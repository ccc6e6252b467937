//! Provisioning record codec
//!
//! Records are `key=value` pairs joined by `&`, e.g.
//! `ssid=home&password=secret`. There is no escaping, so values cannot
//! contain `&` or `=`.

use crate::core::{
    error::ParseError,
    types::{CredentialRecord, Secret},
};

const SSID_KEY: &str = "ssid";
const PASSWORD_KEY: &str = "password";

/// Decoder for the provisioning wire format
pub struct CredentialCodec;

impl CredentialCodec {
    /// Parse a raw record into upstream credentials
    ///
    /// The record ends at the first NUL byte. Segments without `=` are
    /// skipped, unknown keys are ignored, and a repeated key keeps its last
    /// value.
    pub fn parse(raw: &[u8]) -> Result<CredentialRecord, ParseError> {
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let decoded = String::from_utf8_lossy(&raw[..end]);
        let text: &str = decoded
            .strip_suffix("\r\n")
            .or_else(|| decoded.strip_suffix('\n'))
            .unwrap_or(&decoded);

        let mut ssid = None;
        let mut password = None;

        for (key, value) in text.split('&').filter_map(|segment| segment.split_once('=')) {
            match key {
                SSID_KEY => ssid = Some(value),
                PASSWORD_KEY => password = Some(value),
                _ => {}
            }
        }

        let identifier = ssid
            .filter(|s| !s.is_empty())
            .ok_or(ParseError::MissingField(SSID_KEY))?;
        let credential = password
            .filter(|p| !p.is_empty())
            .ok_or(ParseError::MissingField(PASSWORD_KEY))?;

        Ok(CredentialRecord {
            identifier: identifier.to_string(),
            credential: Secret::new(credential),
        })
    }
}
