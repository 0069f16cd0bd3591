use std::path::{Path, PathBuf};

use log::info;
use walkdir::WalkDir;

use crate::error::PipelineError;

/// Recognized vector layer file extension.
pub const VECTOR_EXT: &str = "geojson";

/// List the files in `root` (non-recursive) whose name carries the vector
/// extension and contains at least one configured source code as a
/// substring. Directory-listing order is preserved; downstream paint order
/// depends on it.
pub fn discover(root: &Path, codes: &[&str]) -> Result<Vec<PathBuf>, PipelineError> {
    // Surface an unreadable directory up front instead of silently yielding
    // nothing from the walk.
    std::fs::read_dir(root).map_err(|source| PipelineError::FileSystem {
        path: root.to_path_buf(),
        source,
    })?;

    info!("Scanning directory: {}", root.display());

    let mut found = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.into_path();

        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();

        if ext != VECTOR_EXT {
            continue;
        }

        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();

        if code_for(name, codes).is_some() {
            info!("  -> found layer file: {}", name);
            found.push(path);
        }
    }

    Ok(found)
}

/// First configured code found as a substring of `filename`, scanning codes
/// in their configured order. Table order is the tie-break when codes are
/// not mutually exclusive substrings.
pub fn code_for<'a>(filename: &str, codes: &[&'a str]) -> Option<&'a str> {
    codes.iter().copied().find(|code| filename.contains(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_for_matches_substring() {
        let codes = ["OT_PTZB_A", "OT_PTWP_A"];
        assert_eq!(
            code_for("PL.PZGiK.336.3019__OT_PTZB_A.geojson", &codes),
            Some("OT_PTZB_A")
        );
        assert_eq!(code_for("unrelated.geojson", &codes), None);
    }

    #[test]
    fn test_code_for_first_match_wins() {
        // Overlapping codes: configured order is the tie-break.
        let codes = ["AB", "ABC"];
        assert_eq!(code_for("x_ABC_y.geojson", &codes), Some("AB"));

        let reversed = ["ABC", "AB"];
        assert_eq!(code_for("x_ABC_y.geojson", &reversed), Some("ABC"));
    }

    #[test]
    fn test_discover_missing_directory_fails() {
        let err = discover(Path::new("/definitely/not/here"), &["OT_PTZB_A"]);
        assert!(matches!(err, Err(PipelineError::FileSystem { .. })));
    }
}
