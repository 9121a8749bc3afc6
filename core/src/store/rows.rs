/// Stored row formats (column names follow the hosted tables)
use crate::types::{EdgeStatus, FriendEdge, Identity, Message, Player};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EdgeRow {
    id: u64,
    from_id: String,
    to_id: String,
    status: EdgeStatus,
    created_at: String, // RFC3339
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRow {
    id: u64,
    sender_id: String,
    receiver_id: String,
    text: String,
    read: bool,
    created_at: String, // RFC3339
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

pub(crate) fn encode_edge(edge: &FriendEdge) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&EdgeRow {
        id: edge.id,
        from_id: edge.from_id.to_string(),
        to_id: edge.to_id.to_string(),
        status: edge.status,
        created_at: edge.created_at.to_rfc3339(),
    })
}

/// Decode an edge row; corrupt rows are logged and skipped
pub(crate) fn decode_edge(raw: &[u8]) -> Option<FriendEdge> {
    let row: EdgeRow = match serde_json::from_slice(raw) {
        Ok(r) => r,
        Err(e) => {
            warn!("Skipping undecodable friend edge row: {}", e);
            return None;
        }
    };
    let Some(created_at) = parse_date(&row.created_at) else {
        warn!("Skipping friend edge {}: malformed createdAt {:?}", row.id, row.created_at);
        return None;
    };
    Some(FriendEdge {
        id: row.id,
        from_id: Identity::new(row.from_id),
        to_id: Identity::new(row.to_id),
        status: row.status,
        created_at,
    })
}

pub(crate) fn encode_message(msg: &Message) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&MessageRow {
        id: msg.id,
        sender_id: msg.sender_id.to_string(),
        receiver_id: msg.receiver_id.to_string(),
        text: msg.text.clone(),
        read: msg.read,
        created_at: msg.timestamp.to_rfc3339(),
    })
}

/// Decode a message row; corrupt rows are logged and skipped
pub(crate) fn decode_message(raw: &[u8]) -> Option<Message> {
    let row: MessageRow = match serde_json::from_slice(raw) {
        Ok(r) => r,
        Err(e) => {
            warn!("Skipping undecodable message row: {}", e);
            return None;
        }
    };
    let Some(timestamp) = parse_date(&row.created_at) else {
        warn!("Skipping message {}: malformed createdAt {:?}", row.id, row.created_at);
        return None;
    };
    Some(Message {
        id: row.id,
        sender_id: Identity::new(row.sender_id),
        receiver_id: Identity::new(row.receiver_id),
        text: row.text,
        timestamp,
        read: row.read,
    })
}

pub(crate) fn decode_player(raw: &[u8]) -> Option<Player> {
    match serde_json::from_slice::<Player>(raw) {
        Ok(p) => Some(p),
        Err(e) => {
            warn!("Skipping undecodable player row: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_row_uses_table_columns() {
        let msg = Message {
            id: 7,
            sender_id: Identity::from("a"),
            receiver_id: Identity::from("b"),
            text: "hi".into(),
            timestamp: Utc::now(),
            read: false,
        };
        let raw = encode_message(&msg).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(v["senderId"], "a");
        assert_eq!(v["receiverId"], "b");
        assert!(v["createdAt"].is_string());
        assert_eq!(decode_message(&raw), Some(msg));
    }

    #[test]
    fn test_malformed_date_is_skipped() {
        let raw = br#"{"id":1,"senderId":"a","receiverId":"b","text":"x","read":false,"createdAt":"yesterday"}"#;
        assert!(decode_message(raw).is_none());

        let raw = br#"{"id":1,"fromId":"a","toId":"b","status":"pending","createdAt":"2024-13-45"}"#;
        assert!(decode_edge(raw).is_none());
        assert!(decode_edge(b"not json").is_none());
    }
}
