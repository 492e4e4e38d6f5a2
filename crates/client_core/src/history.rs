//! Loads the stored transcript between the local user and a peer.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use shared::{
    domain::{Peer, UserId},
    protocol::HistoryRecord,
};
use tracing::{debug, info, warn};

use crate::{
    api::BackendApi,
    error::SessionError,
    transcript::{DeliveryStatus, Message},
};

const DISPLAY_TIME_FORMAT: &str = "%H:%M";
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Short local wall-clock time. Naive timestamps are taken as UTC; anything
/// unparsable renders as an empty label.
pub fn format_display_time(timestamp: &str) -> String {
    let parsed = DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.with_timezone(&Local))
        .ok()
        .or_else(|| {
            NAIVE_FORMATS.iter().find_map(|format| {
                NaiveDateTime::parse_from_str(timestamp, format)
                    .ok()
                    .map(|naive| Utc.from_utc_datetime(&naive).with_timezone(&Local))
            })
        });
    match parsed {
        Some(local) => local.format(DISPLAY_TIME_FORMAT).to_string(),
        None => {
            debug!(timestamp, "unparsable history timestamp");
            String::new()
        }
    }
}

pub fn now_display_time() -> String {
    Local::now().format(DISPLAY_TIME_FORMAT).to_string()
}

/// Keeps server order; direction comes from the record's sender.
pub fn map_history(records: &[HistoryRecord], local_id: UserId, peer: &Peer) -> Vec<Message> {
    records
        .iter()
        .map(|record| {
            Message::from_sender(
                Some(record.sender_id),
                local_id,
                &peer.username,
                record.content.clone(),
                format_display_time(&record.timestamp),
                DeliveryStatus::Sent,
            )
        })
        .collect()
}

pub async fn load_history(
    backend: &dyn BackendApi,
    local_id: UserId,
    peer: &Peer,
) -> Result<Vec<Message>, SessionError> {
    let records = backend
        .fetch_history(local_id, peer.id)
        .await
        .map_err(|err| {
            warn!(peer_id = peer.id.0, error = %err, "history load failed");
            SessionError::unreachable(&err)
        })?;
    info!(
        peer_id = peer.id.0,
        records = records.len(),
        "history loaded"
    );
    Ok(map_history(&records, local_id, peer))
}
