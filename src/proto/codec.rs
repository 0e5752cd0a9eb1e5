//! Tag-prefixed bincode encode/decode for `Message`, plus the compound
//! message that batches several small messages into a single UDP datagram.

use bincode::config::Configuration;

use crate::error::{AgentError, Result};

use super::messages::*;

fn bincode_config() -> Configuration {
    bincode::config::standard()
}

fn encode_body<T: bincode::Encode>(body: &T) -> Result<Vec<u8>> {
    bincode::encode_to_vec(body, bincode_config())
        .map_err(|e| AgentError::Codec(format!("bincode encode failed: {e}")))
}

fn decode_body<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T> {
    bincode::decode_from_slice(bytes, bincode_config())
        .map(|(v, _)| v)
        .map_err(|e| AgentError::Codec(format!("bincode decode failed: {e}")))
}

/// Encode a single message as `[tag byte][bincode body]`.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>> {
    let mut out = vec![msg.kind() as u8];
    let body = match msg {
        Message::Ping(m) => encode_body(m)?,
        Message::IndirectPing(m) => encode_body(m)?,
        Message::AckResp(m) => encode_body(m)?,
        Message::NackResp(m) => encode_body(m)?,
        Message::Suspect(m) => encode_body(m)?,
        Message::Alive(m) => encode_body(m)?,
        Message::Dead(m) => encode_body(m)?,
        Message::PushPull(m) => encode_body(m)?,
        Message::User(m) => encode_body(m)?,
        Message::Compound(m) => encode_body(m)?,
        Message::Err(m) => encode_body(m)?,
        Message::Query(m) => encode_body(m)?,
        Message::QueryResponse(m) => encode_body(m)?,
    };
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a `[tag byte][bincode body]` frame into a `Message`.
pub fn decode_message(data: &[u8]) -> Result<Message> {
    let (&tag, body) = data
        .split_first()
        .ok_or_else(|| AgentError::Codec("empty message".into()))?;
    let kind = MessageKind::from_byte(tag)
        .ok_or_else(|| AgentError::Codec(format!("unknown message tag {tag}")))?;
    Ok(match kind {
        MessageKind::Ping => Message::Ping(decode_body(body)?),
        MessageKind::IndirectPing => Message::IndirectPing(decode_body(body)?),
        MessageKind::AckResp => Message::AckResp(decode_body(body)?),
        MessageKind::NackResp => Message::NackResp(decode_body(body)?),
        MessageKind::Suspect => Message::Suspect(decode_body(body)?),
        MessageKind::Alive => Message::Alive(decode_body(body)?),
        MessageKind::Dead => Message::Dead(decode_body(body)?),
        MessageKind::PushPull => Message::PushPull(decode_body(body)?),
        MessageKind::User => Message::User(decode_body(body)?),
        MessageKind::Compound => Message::Compound(decode_body(body)?),
        MessageKind::Err => Message::Err(decode_body(body)?),
        MessageKind::Query => Message::Query(decode_body(body)?),
        MessageKind::QueryResponse => Message::QueryResponse(decode_body(body)?),
        MessageKind::Compress | MessageKind::Encrypt | MessageKind::HasCrc => {
            return Err(AgentError::Codec(format!(
                "{kind:?} is an envelope tag, not a standalone message"
            )));
        }
    })
}

/// Pack several already-encoded messages into one `Compound` message, for
/// batching small gossip broadcasts into a single datagram.
pub fn pack_compound(messages: Vec<Vec<u8>>) -> Message {
    Message::Compound(Compound { messages })
}

/// Unpack a `Compound` message back into its constituent encoded messages.
/// Non-compound input is returned as the sole element.
pub fn unpack_compound(msg: Message) -> Vec<Vec<u8>> {
    match msg {
        Message::Compound(c) => c.messages,
        other => vec![encode_message(&other).unwrap_or_default()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn round_trips_ping() {
        let msg = Message::Ping(Ping {
            seq_no: 7,
            node: "node-a".into(),
            source_node: None,
            source_addr: None,
            source_port: 0,
        });
        let wire = encode_message(&msg).unwrap();
        let decoded = decode_message(&wire).unwrap();
        match decoded {
            Message::Ping(p) => assert_eq!(p.seq_no, 7),
            _ => panic!("expected ping"),
        }
    }

    #[test]
    fn compound_round_trips_multiple_messages() {
        let a = Message::AckResp(AckResp { seq_no: 1, payload: vec![] });
        let b = Message::Dead(Dead { incarnation: 3, node: "x".into(), from: "y".into() });
        let packed = pack_compound(vec![encode_message(&a).unwrap(), encode_message(&b).unwrap()]);
        let wire = encode_message(&packed).unwrap();
        let decoded = decode_message(&wire).unwrap();
        let parts = unpack_compound(decoded);
        assert_eq!(parts.len(), 2);
        assert!(matches!(decode_message(&parts[0]).unwrap(), Message::AckResp(_)));
        assert!(matches!(decode_message(&parts[1]).unwrap(), Message::Dead(_)));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = decode_message(&[255, 0, 0]).unwrap_err();
        assert!(matches!(err, AgentError::Codec(_)));
    }

    #[test]
    fn alive_round_trips_with_address() {
        let msg = Message::Alive(Alive {
            incarnation: 1,
            node: "node-a".into(),
            addr: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 7946,
            meta: vec![1, 2, 3],
            vsn: [0, 5, 2, 0, 1, 0],
        });
        let wire = encode_message(&msg).unwrap();
        match decode_message(&wire).unwrap() {
            Message::Alive(a) => assert_eq!(a.port, 7946),
            _ => panic!("expected alive"),
        }
    }
}
