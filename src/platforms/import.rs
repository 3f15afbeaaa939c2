// JSONL import: raw platform records in, normalized posts and accounts out.
//
// One JSON object per line. Lines that aren't JSON or don't normalize are
// logged and counted, never fatal. Posts are upserted by (platform, id), so
// importing the same file twice changes nothing.

use std::collections::BTreeMap;
use std::io::BufRead;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::{Account, Platform, Post};
use crate::db::Database;

/// Records are written in chunks of this many posts.
const IMPORT_CHUNK: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Non-empty lines read
    pub lines: usize,
    pub posts: usize,
    pub accounts: usize,
    pub malformed: usize,
}

/// Normalize every line of `reader` as a `platform` record and store it.
pub async fn import_jsonl<R: BufRead>(
    db: &dyn Database,
    platform: Platform,
    reader: R,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    let mut posts: Vec<Post> = Vec::new();
    let mut accounts: BTreeMap<String, Account> = BTreeMap::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        summary.lines += 1;

        let raw: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Skipping line that is not JSON");
                summary.malformed += 1;
                continue;
            }
        };

        match platform.normalize(&raw) {
            Ok(record) => {
                accounts.insert(record.account.id.clone(), record.account);
                posts.push(record.post);
            }
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Skipping malformed record");
                summary.malformed += 1;
                continue;
            }
        }

        if posts.len() >= IMPORT_CHUNK {
            summary.posts += db.insert_posts(&posts).await?;
            debug!(total = summary.posts, "Imported chunk");
            posts.clear();
        }
    }

    if !posts.is_empty() {
        summary.posts += db.insert_posts(&posts).await?;
    }
    let accounts: Vec<Account> = accounts.into_values().collect();
    summary.accounts = db.upsert_accounts(&accounts).await?;

    info!(
        platform = %platform,
        posts = summary.posts,
        accounts = summary.accounts,
        malformed = summary.malformed,
        "Import finished"
    );
    Ok(summary)
}
