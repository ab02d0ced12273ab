//! Export/import bundle format: a tarball-free JSON envelope carrying a
//! session's snapshots and events (supplemented feature, SPEC_FULL.md §3;
//! the concrete wire shape for `export`/`import` is unspecified upstream).

use std::ops::Range;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use trace_core::{checksum_hex16, Event, Session, Snapshot};
use trace_store::{PersistentStore, TraceQuery};
use uuid::Uuid;

use crate::error::{SnapshotError, SnapshotResult};

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub time_range: Option<Range<i64>>,
    pub include_events: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub validate_integrity: bool,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleSnapshot {
    pub snapshot: Snapshot,
    pub base_snapshot_id: Option<Uuid>,
    /// Base64-encoded stored bytes (already gzipped when `snapshot.compressed`).
    pub body_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub session: Session,
    pub snapshots: Vec<BundleSnapshot>,
    pub events: Vec<Event>,
}

pub async fn export(
    store: &Arc<dyn PersistentStore>,
    session_id: Uuid,
    options: ExportOptions,
) -> SnapshotResult<Bundle> {
    let session = store
        .get_session(session_id)
        .await?
        .ok_or(SnapshotError::Storage {
            message: format!("session {session_id} not found"),
        })?;

    let metas = store.list_snapshots(Some(session_id)).await?;
    let mut snapshots = Vec::with_capacity(metas.len());
    for meta in metas {
        if let Some(range) = &options.time_range {
            if !range.contains(&meta.timestamp) {
                continue;
            }
        }
        let Some((snapshot, base_snapshot_id, bytes)) = store.get_snapshot(meta.id).await? else {
            continue;
        };
        snapshots.push(BundleSnapshot {
            snapshot,
            base_snapshot_id,
            body_base64: BASE64.encode(bytes),
        });
    }

    let events = if options.include_events {
        let query = TraceQuery {
            time_range: options.time_range.clone(),
            ..Default::default()
        };
        store.get_traces_by_session(session_id, query).await?
    } else {
        Vec::new()
    };

    Ok(Bundle {
        session,
        snapshots,
        events,
    })
}

pub async fn import(
    store: &Arc<dyn PersistentStore>,
    bundle: Bundle,
    options: ImportOptions,
) -> SnapshotResult<ImportReport> {
    let mut report = ImportReport::default();

    match store.get_session(bundle.session.id).await? {
        Some(_) if !options.overwrite => {
            report.skipped += 1;
        }
        Some(_) => {
            store.update_session(&bundle.session).await?;
        }
        None => {
            // `upsert_session` preserves `bundle.session.id` itself, which the
            // bundle's snapshots and events reference; `create_session` would
            // mint a new random id and orphan them.
            store.upsert_session(&bundle.session).await?;
        }
    }

    for entry in bundle.snapshots {
        let bytes = match BASE64.decode(&entry.body_base64) {
            Ok(b) => b,
            Err(e) => {
                report.errors.push(format!("{}: invalid base64: {e}", entry.snapshot.id));
                continue;
            }
        };

        if options.validate_integrity {
            let canonical = if entry.snapshot.compressed {
                match trace_core::gzip_decompress(&bytes) {
                    Ok(c) => c,
                    Err(e) => {
                        report.errors.push(format!("{}: {e}", entry.snapshot.id));
                        continue;
                    }
                }
            } else {
                bytes.clone()
            };
            let actual = checksum_hex16(&canonical);
            if actual != entry.snapshot.checksum {
                report.errors.push(format!(
                    "{}: checksum mismatch (expected {}, got {actual})",
                    entry.snapshot.id, entry.snapshot.checksum
                ));
                continue;
            }
        }

        if store.get_snapshot(entry.snapshot.id).await?.is_some() && !options.overwrite {
            report.skipped += 1;
            continue;
        }

        match store
            .store_snapshot(&entry.snapshot, entry.base_snapshot_id, &bytes)
            .await
        {
            Ok(()) => report.imported += 1,
            Err(e) => report.errors.push(format!("{}: {e}", entry.snapshot.id)),
        }
    }

    if !bundle.events.is_empty() {
        match store.store_batch(&bundle.events).await {
            Ok(()) => report.imported += bundle.events.len(),
            Err(e) => report.errors.push(format!("event batch: {e}")),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trips_snapshot_bytes() {
        let bytes = b"some snapshot bytes".to_vec();
        let encoded = BASE64.encode(&bytes);
        let decoded = BASE64.decode(&encoded).unwrap();
        assert_eq!(decoded, bytes);
    }
}
