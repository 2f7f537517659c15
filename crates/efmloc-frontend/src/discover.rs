//! Discovery and grouping of trace files.
//!
//! Files named `<prefix>-<runId>.json` and `<prefix>-<runId>.<fragment>.json`
//! share a stem (up to the last dot) and form one import group.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::errors::FrontendError;

/// Splits a prefix like `download/eq-10-5MB` into its directory part and the
/// file-name part.
pub fn split_prefix(prefix: &str) -> Result<(Option<&str>, &str), FrontendError> {
    let prefix = prefix.strip_prefix('/').unwrap_or(prefix);
    if prefix.is_empty() {
        return Err(FrontendError::InvalidPrefix(prefix.to_owned()));
    }
    match prefix.rsplit_once('/') {
        Some((dir, name)) if !name.is_empty() => Ok((Some(dir), name)),
        Some(_) => Err(FrontendError::InvalidPrefix(prefix.to_owned())),
        None => Ok((None, prefix)),
    }
}

/// Collects the matching files of one directory, grouped by stem.
pub fn find_file_groups(
    dir: &Path,
    file_prefix: &str,
) -> Result<BTreeMap<String, BTreeSet<PathBuf>>, FrontendError> {
    if !dir.exists() {
        return Err(FrontendError::MissingPath(dir.to_owned()));
    }

    let mut groups: BTreeMap<String, BTreeSet<PathBuf>> = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.starts_with(file_prefix) {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match stem.rsplit_once('.') {
            // A fragment file; only accept it when the prefix is followed by
            // the run-id separator, so `eq-10` does not swallow `eq-100`.
            Some((group, _)) => {
                if file_name.starts_with(&format!("{file_prefix}-")) {
                    groups.entry(group.to_owned()).or_default().insert(path);
                }
            }
            None => {
                groups.entry(stem.to_owned()).or_default().insert(path);
            }
        }
    }

    if groups.is_empty() {
        return Err(FrontendError::NoMatchingFiles {
            prefix: file_prefix.to_owned(),
            path: dir.to_owned(),
        });
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_split_into_dir_and_name() {
        assert_eq!(split_prefix("eq-10").unwrap(), (None, "eq-10"));
        assert_eq!(
            split_prefix("download/eq-10-5MB").unwrap(),
            (Some("download"), "eq-10-5MB")
        );
        assert_eq!(
            split_prefix("/download/eq-10").unwrap(),
            (Some("download"), "eq-10")
        );
        assert!(split_prefix("/").is_err());
    }

    #[test]
    fn fragments_group_with_their_master() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        for name in [
            "eq-10-1.json",
            "eq-10-1.frag0.json",
            "eq-10-1.frag1.json",
            "eq-10-2.json",
            "eq-10-2.txt",
            "other-1.json",
        ] {
            std::fs::write(dir.path().join(name), "{}")?;
        }

        let groups = find_file_groups(dir.path(), "eq-10")?;
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["eq-10-1"].len(), 3);
        assert_eq!(groups["eq-10-2"].len(), 1);
        Ok(())
    }
}
