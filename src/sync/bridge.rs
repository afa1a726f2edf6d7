//! Line-delimited JSON bridge into a `LocalChangeFeed`.
//!
//! Each line is one row change as the realtime service emits it, e.g.
//! `{"eventType":"UPDATE","table":"orchestrator_runs","new":{...}}`. Any
//! external listener can be piped in this way.

use crate::sync::feed::{LocalChangeFeed, RowChange};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

/// Publish every decodable line until EOF or a read error, then disconnect
/// all subscribers. Returns how many changes were published.
pub async fn pump_ndjson<R>(reader: R, feed: LocalChangeFeed) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut published = 0;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<RowChange>(line) {
                    Ok(change) => {
                        let delivered = feed.publish(change);
                        debug!(delivered, "row change published");
                        published += 1;
                    }
                    Err(e) => warn!(error = %e, "skipping undecodable change line"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "change stream read failed");
                break;
            }
        }
    }
    feed.disconnect_all();
    published
}
