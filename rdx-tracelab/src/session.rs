//! Session-wide context and output tree handling.

use crate::config::TimingConfig;
use crate::error::{Result, TracelabError};
use crate::recording::timestamp;
use crate::rig::{MotionCapture, Scene};
use crate::signal::Signal;
use chrono::Local;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Read-only context handed down from the experiment to its blocks and trials.
///
/// It replaces walking up parent pointers: everything a trial needs from the
/// levels above it is here.
#[derive(Clone)]
pub struct SessionContext {
    pub scene: Arc<dyn Scene>,
    pub rig: Arc<dyn MotionCapture>,
    /// Fired when an effector touches the target. Trials fall back to a space
    /// key press when absent.
    pub target_signal: Option<Signal>,
    pub timing: TimingConfig,
}

/// Picks a fresh, collision-resistant session directory under `root`.
pub fn session_dir<R: Rng + ?Sized>(root: &Path, rng: &mut R) -> PathBuf {
    let suffix: u32 = rng.random_range(0..=0xff_ffff);
    root.join(format!("{}-{:08x}", timestamp(&Local::now()), suffix))
}

/// Result of copying a session tree into the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Copied(PathBuf),
    /// An entry of the same name already existed; nothing was written.
    AlreadyArchived(PathBuf),
}

/// Copies `session` into `archive_root/<session name>` unless that entry exists.
pub fn archive_session(session: &Path, archive_root: &Path) -> Result<ArchiveOutcome> {
    let name = session.file_name().ok_or_else(|| {
        TracelabError::InvalidConfig(format!("session path {} has no name", session.display()))
    })?;
    let destination = archive_root.join(name);
    if destination.exists() {
        info!("{} is already archived", destination.display());
        return Ok(ArchiveOutcome::AlreadyArchived(destination));
    }
    fs::create_dir_all(archive_root).map_err(|e| TracelabError::io(archive_root, e))?;
    copy_tree(session, &destination)?;
    info!("archived session to {}", destination.display());
    Ok(ArchiveOutcome::Copied(destination))
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir(to).map_err(|e| TracelabError::io(to, e))?;
    for entry in fs::read_dir(from).map_err(|e| TracelabError::io(from, e))? {
        let entry = entry.map_err(|e| TracelabError::io(from, e))?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| TracelabError::io(&source, e))?;
        if file_type.is_dir() {
            copy_tree(&source, &target)?;
        } else {
            fs::copy(&source, &target).map_err(|e| TracelabError::io(&source, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    fn sample_session(root: &Path) -> PathBuf {
        let session = root.join("20140309140507-00a1b2c3");
        let block = session.join("block0-UNWEIGHTED-SLOW-DOMINANT-RANDOM");
        fs::create_dir_all(&block).unwrap();
        fs::write(block.join("trial.csv"), "frame\n0\n").unwrap();
        session
    }

    #[test]
    fn session_dir_has_stamp_and_hex_suffix() {
        let mut rng = StdRng::seed_from_u64(3);
        let dir = session_dir(Path::new("/data"), &mut rng);
        let name = dir.file_name().unwrap().to_str().unwrap();
        let (stamp, suffix) = name.split_once('-').unwrap();
        assert_eq!(stamp.len(), 14);
        assert_eq!(suffix.len(), 8);
        assert!(u32::from_str_radix(suffix, 16).unwrap() <= 0xff_ffff);
    }

    #[test]
    fn archive_copies_the_whole_tree() {
        let work = tempdir().unwrap();
        let session = sample_session(work.path());
        let archive = work.path().join("archive");

        let outcome = archive_session(&session, &archive).unwrap();
        let dest = archive.join("20140309140507-00a1b2c3");
        assert_eq!(outcome, ArchiveOutcome::Copied(dest.clone()));
        let copied = dest.join("block0-UNWEIGHTED-SLOW-DOMINANT-RANDOM").join("trial.csv");
        assert_eq!(fs::read_to_string(copied).unwrap(), "frame\n0\n");
    }

    #[test]
    fn archive_is_idempotent_and_never_overwrites() {
        let work = tempdir().unwrap();
        let session = sample_session(work.path());
        let archive = work.path().join("archive");
        archive_session(&session, &archive).unwrap();

        let archived_file = archive
            .join("20140309140507-00a1b2c3")
            .join("block0-UNWEIGHTED-SLOW-DOMINANT-RANDOM")
            .join("trial.csv");
        fs::write(&archived_file, "kept\n").unwrap();

        let second = archive_session(&session, &archive).unwrap();
        assert!(matches!(second, ArchiveOutcome::AlreadyArchived(_)));
        assert_eq!(fs::read_to_string(archived_file).unwrap(), "kept\n");
    }

    #[test]
    fn a_file_in_the_way_counts_as_archived() {
        let work = tempdir().unwrap();
        let session = sample_session(work.path());
        let archive = work.path().join("archive");
        fs::create_dir(&archive).unwrap();
        let in_the_way = archive.join("20140309140507-00a1b2c3");
        fs::write(&in_the_way, "not a directory").unwrap();

        let outcome = archive_session(&session, &archive).unwrap();
        assert_eq!(outcome, ArchiveOutcome::AlreadyArchived(in_the_way.clone()));
        assert_eq!(fs::read_to_string(in_the_way).unwrap(), "not a directory");
    }
}
