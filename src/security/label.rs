//! Optional cluster label header: a typed header
//! prepended to outgoing packets (tag 244, 1-byte length, label bytes) that
//! is also fed as AEAD associated data.

use crate::error::{AgentError, Result};

/// Wire tag identifying a label header, reusing the message-type byte space.
pub const LABEL_TAG: u8 = 244;

/// Prepend a label header to `data`, or return `data` unchanged if `label`
/// is `None`.
pub fn add_label(data: &[u8], label: Option<&str>) -> Result<Vec<u8>> {
    let Some(label) = label else {
        return Ok(data.to_vec());
    };
    if label.len() > crate::common::MAX_LABEL_LEN {
        return Err(AgentError::Config(format!(
            "label length {} exceeds {} byte limit",
            label.len(),
            crate::common::MAX_LABEL_LEN
        )));
    }
    let mut out = Vec::with_capacity(2 + label.len() + data.len());
    out.push(LABEL_TAG);
    out.push(label.len() as u8);
    out.extend_from_slice(label.as_bytes());
    out.extend_from_slice(data);
    Ok(out)
}

/// Strip a label header if present, returning `(label, rest)`. `label` is
/// `None` if the packet did not carry a header at all.
pub fn remove_label(data: &[u8]) -> Result<(Option<String>, &[u8])> {
    match data.first() {
        Some(&tag) if tag == LABEL_TAG => {
            let len = *data
                .get(1)
                .ok_or_else(|| AgentError::Codec("truncated label header".into()))?
                as usize;
            let label_start = 2;
            let label_end = label_start + len;
            if data.len() < label_end {
                return Err(AgentError::Codec("truncated label bytes".into()));
            }
            let label = String::from_utf8(data[label_start..label_end].to_vec())
                .map_err(|_| AgentError::Codec("label is not valid UTF-8".into()))?;
            Ok((Some(label), &data[label_end..]))
        }
        _ => Ok((None, data)),
    }
}

/// Verify an inbound label against the configured label. `None` configured
/// means labels are not enforced.
pub fn verify_label(received: Option<&str>, configured: Option<&str>) -> bool {
    match (received, configured) {
        (None, None) => true,
        (Some(r), Some(c)) => r == c,
        _ => false,
    }
}
