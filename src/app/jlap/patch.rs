//! Patch records carried in a JLAP body
//!
//! Records form a chain of `from -> to` hashes. Only the suffix of the chain
//! that leads from the locally held hash to the log's `latest` is applied.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::core::Jlap;
use crate::errors::{PatchError, PatchResult};

/// One `{"from", "to", "patch"}` line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRecord {
    pub from: String,
    pub to: String,
    /// RFC 6902 operations, decoded only when the record is applied
    pub patch: Value,
}

impl PatchRecord {
    /// Decode every body line of `log`
    pub fn from_log(log: &Jlap) -> PatchResult<Vec<Self>> {
        log.body()
            .iter()
            .map(|entry| serde_json::from_str(&entry.text).map_err(PatchError::from))
            .collect()
    }
}

/// Select the patches that lead from `have` to `want`
///
/// Walks backwards from the newest record, following `to -> from` links. The
/// result is in collection order, newest first.
///
/// # Errors
///
/// Returns `PatchError::NotFound` when the walk never reaches `have`.
pub fn find_patches<'a>(
    patches: &'a [PatchRecord],
    have: &str,
    want: &str,
) -> PatchResult<Vec<&'a PatchRecord>> {
    let mut apply = Vec::new();
    let mut want = want;
    for patch in patches.iter().rev() {
        if have == want {
            break;
        }
        if patch.to == want {
            apply.push(patch);
            want = patch.from.as_str();
        }
    }

    if have != want {
        debug!("No patch from local revision {}", short(have));
        return Err(PatchError::NotFound {
            have: have.to_string(),
            want: want.to_string(),
        });
    }
    Ok(apply)
}

/// Apply patches selected by [`find_patches`] oldest first
///
/// The document is only replaced once every patch has applied, so a failure
/// leaves `doc` untouched.
pub fn apply_patches(doc: &mut Value, apply: &[&PatchRecord]) -> PatchResult<()> {
    let mut patched = doc.clone();
    for (i, record) in apply.iter().rev().enumerate() {
        let remaining = apply.len() - i - 1;
        debug!(
            "{} \u{2192} {}, {} steps left",
            short(&record.from),
            short(&record.to),
            remaining
        );
        let apply_error = |reason: String| PatchError::Apply {
            from: record.from.clone(),
            to: record.to.clone(),
            reason,
        };
        let ops: json_patch::Patch =
            serde_json::from_value(record.patch.clone()).map_err(|e| apply_error(e.to_string()))?;
        json_patch::patch(&mut patched, &ops.0).map_err(|e| apply_error(e.to_string()))?;
    }
    *doc = patched;
    Ok(())
}

/// Abbreviated hash for log messages
pub fn short(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}
