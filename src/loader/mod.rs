//! Handle loader for re-enriching a previously saved Users sheet.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// First column of a Users CSV (header row skipped), trimmed, deduplicated,
/// in file order.
pub fn load_handles(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {:?}", path))?;

    let mut seen = HashSet::new();
    let mut handles = Vec::new();

    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };

        let Some(handle) = record.get(0).map(str::trim).filter(|h| !h.is_empty()) else {
            debug!("Row {} in {:?} has no handle", i + 1, path);
            continue;
        };
        if seen.insert(handle.to_string()) {
            handles.push(handle.to_string());
        }
    }

    info!("{} handles loaded from {:?}", handles.len(), path);
    Ok(handles)
}
