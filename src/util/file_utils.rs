use anyhow::Context;
use std::path::{Path, PathBuf};

use crate::util::constants::{
    CHECKPOINT_SUFFIX, MEMBERSHIP_PREFIX, MEMBERSHIP_SUFFIX, MODEL_SUFFIX, SCORES_PREFIX,
    SCORES_SUFFIX, TRAINING_SUFFIX,
};

/// `cluster-<c>.fa`: the reads currently assigned to cluster `c`.
pub fn membership_path(dir: &Path, cluster: usize) -> PathBuf {
    dir.join(format!("{MEMBERSHIP_PREFIX}{cluster}{MEMBERSHIP_SUFFIX}"))
}

/// `cluster-<c>.max`: membership of cluster `c` in the best checkpoint.
pub fn checkpoint_path(dir: &Path, cluster: usize) -> PathBuf {
    dir.join(format!("{MEMBERSHIP_PREFIX}{cluster}{CHECKPOINT_SUFFIX}"))
}

/// `cluster-<c>.build.fa`: the training input for cluster `c`.
pub fn training_path(dir: &Path, cluster: usize) -> PathBuf {
    dir.join(format!("{MEMBERSHIP_PREFIX}{cluster}{TRAINING_SUFFIX}"))
}

pub fn model_path(dir: &Path, cluster: usize) -> PathBuf {
    dir.join(format!("{MEMBERSHIP_PREFIX}{cluster}{MODEL_SUFFIX}"))
}

/// `icm-<c>.scores.tmp`: every read scored by the model of cluster `c`.
pub fn scores_path(dir: &Path, cluster: usize) -> PathBuf {
    dir.join(format!("{SCORES_PREFIX}{cluster}{SCORES_SUFFIX}"))
}

/// Parse the cluster index out of a `cluster-<c>.fa` file name.
pub fn membership_index(path: &Path) -> Option<usize> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(MEMBERSHIP_PREFIX)?
        .strip_suffix(MEMBERSHIP_SUFFIX)?
        .parse::<usize>()
        .ok()
}

/// Indices of all `cluster-<c>.fa` files in `dir`, ascending.
pub fn membership_indices(dir: &Path) -> anyhow::Result<Vec<usize>> {
    let mut idx = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading directory {}", dir.display()))? {
        let entry = entry?;
        if let Some(c) = membership_index(&entry.path()) {
            idx.push(c);
        }
    }
    idx.sort_unstable();
    Ok(idx)
}

pub fn is_nonempty_file(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}

/// Create `dir`, or empty it of regular files if it already exists.
pub fn prepare_empty_dir(dir: &Path) -> anyhow::Result<()> {
    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("removing stale file {}", path.display()))?;
            }
        }
    } else {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating directory {}", dir.display()))?;
    }
    Ok(())
}

/// Remove `cluster-<c><suffix>`-style files for every `c >= k`, left
/// over from iterations in which more clusters were alive.
pub fn remove_stale<F: Fn(&Path, usize) -> PathBuf>(dir: &Path, k: usize, path_fn: F) -> anyhow::Result<()> {
    let mut c = k;
    loop {
        let p = path_fn(dir, c);
        if !p.exists() {
            break;
        }
        std::fs::remove_file(&p).with_context(|| format!("removing {}", p.display()))?;
        c += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_names_round_trip() {
        let dir = Path::new("/work");
        let p = membership_path(dir, 12);
        assert_eq!(p, PathBuf::from("/work/cluster-12.fa"));
        assert_eq!(membership_index(&p), Some(12));
        assert_eq!(membership_index(&training_path(dir, 3)), None);
        assert_eq!(membership_index(&checkpoint_path(dir, 3)), None);
        assert_eq!(scores_path(dir, 4), PathBuf::from("/work/icm-4.scores.tmp"));
    }

    #[test]
    fn stale_files_are_removed() {
        let tmp = tempfile::tempdir().unwrap();
        for c in 0..4 {
            std::fs::write(membership_path(tmp.path(), c), ">r\nA\n").unwrap();
        }
        remove_stale(tmp.path(), 2, membership_path).unwrap();
        assert_eq!(membership_indices(tmp.path()).unwrap(), vec![0, 1]);
    }

    #[test]
    fn prepare_empties_existing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let d = tmp.path().join("tmp.start0");
        prepare_empty_dir(&d).unwrap();
        std::fs::write(d.join("junk"), "x").unwrap();
        prepare_empty_dir(&d).unwrap();
        assert_eq!(std::fs::read_dir(&d).unwrap().count(), 0);
        assert!(!is_nonempty_file(&d.join("junk")));
    }
}
