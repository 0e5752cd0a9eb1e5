//! Compatibility policy gate: decides whether a
//! peer's protocol version tuple is compatible with ours before a
//! push/pull exchange or join is accepted, and stamps the on-disk
//! snapshot format version.

use crate::common::ProtocolVersion;
use crate::error::{AgentError, Result};

/// Bumped whenever the snapshot log's line format changes incompatibly.
/// Unlike `ProtocolVersion`, this has no negotiation: a mismatch means the
/// log simply can't be read by this build.
pub const SNAPSHOT_FORMAT_VERSION: u8 = 1;

/// Reject a join/push-pull peer whose protocol version tuple doesn't
/// overlap with ours, with a message specific enough to show up usefully
/// in logs: incompatible peers are refused the exchange rather than
/// silently corrupting shared state.
pub fn check_peer_compatible(local: &ProtocolVersion, remote: &ProtocolVersion) -> Result<()> {
    if local.compatible_with(remote) {
        Ok(())
    } else {
        Err(AgentError::Config(format!(
            "incompatible protocol versions: local proto [{}-{}]@{} delegate [{}-{}]@{}, \
             remote proto [{}-{}]@{} delegate [{}-{}]@{}",
            local.proto_min,
            local.proto_max,
            local.proto_cur,
            local.delegate_min,
            local.delegate_max,
            local.delegate_cur,
            remote.proto_min,
            remote.proto_max,
            remote.proto_cur,
            remote.delegate_min,
            remote.delegate_max,
            remote.delegate_cur,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_versions_are_self_compatible() {
        let v = ProtocolVersion::default();
        assert!(check_peer_compatible(&v, &v).is_ok());
    }

    #[test]
    fn disjoint_ranges_are_rejected_with_a_descriptive_error() {
        let local = ProtocolVersion { proto_min: 0, proto_max: 1, proto_cur: 1, delegate_min: 0, delegate_max: 0, delegate_cur: 0 };
        let remote = ProtocolVersion { proto_min: 3, proto_max: 5, proto_cur: 4, delegate_min: 0, delegate_max: 0, delegate_cur: 0 };
        let err = check_peer_compatible(&local, &remote).unwrap_err();
        assert!(err.to_string().contains("incompatible protocol versions"));
    }
}
