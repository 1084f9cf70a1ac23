//! Transcript archival for closing tickets.
//!
//! Collects the tail of a conversation into a portable text record and
//! delivers it to each participant as a private message. Delivery is
//! best-effort per recipient and the whole operation never propagates an
//! error: an undelivered transcript must not stop a ticket from closing.

use super::platform::ChatPort;
use std::collections::BTreeSet;
use std::io::Write;
use tempfile::NamedTempFile;

/// Upper bound on fetched history. Keeps memory bounded on long tickets.
pub const MESSAGE_WINDOW: usize = 100;

/// Render the channel's recent history and DM it to every recipient.
/// Recipients are deduplicated; one failed delivery does not block the rest.
pub fn deliver<C: ChatPort>(chat: &mut C, channel: &str, recipients: &[String]) {
    let history = match chat.fetch_recent(channel, MESSAGE_WINDOW) {
        Ok(history) => history,
        Err(err) => {
            log::warn!("could not fetch history of {channel} for the transcript: {err:#}");
            return;
        }
    };

    let mut text = format!("Transcript for {channel}\n\n");
    // platform returns newest first; the transcript reads oldest first
    for message in history.iter().rev() {
        text.push_str(&format!(
            "[{}] {}: {}\n",
            message.sent_at.to_datetime_utc().to_rfc3339(),
            message.author_tag,
            message.content
        ));
    }

    // scoped temp file, removed on every exit path below
    let mut file = match NamedTempFile::new() {
        Ok(file) => file,
        Err(err) => {
            log::warn!("could not create the transcript artifact for {channel}: {err}");
            return;
        }
    };
    if let Err(err) = file.write_all(text.as_bytes()).and_then(|_| file.flush()) {
        log::warn!("could not write the transcript artifact for {channel}: {err}");
        return;
    }

    let note = format!("Transcript for channel {channel}");
    let mut seen = BTreeSet::new();
    for recipient in recipients {
        if recipient.is_empty() || !seen.insert(recipient.as_str()) {
            continue;
        }
        if let Err(err) = chat.send_direct_file(recipient, &note, file.path()) {
            log::warn!("transcript delivery to {recipient} failed: {err:#}");
        }
    }
}
