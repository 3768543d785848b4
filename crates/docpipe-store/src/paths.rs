//! Upload path convention.

use std::path::{Path, PathBuf};

use docpipe_models::DocumentId;

/// Where an upload is stored: `{root}/{document_id}_{filename}`.
///
/// Only the final component of `filename` is used, so a client-supplied
/// name cannot escape the uploads root.
pub fn stored_path(root: &Path, id: &DocumentId, filename: &str) -> PathBuf {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    root.join(format!("{}_{}", id, name))
}
