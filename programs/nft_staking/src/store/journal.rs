//! Append-only journal backing the position store.
//!
//! File frames are a `u32` little-endian length followed by the borsh
//! encoding of one [`JournalEntry`].

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anchor_lang::prelude::*;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::{Result, StakingError};
use crate::state::{Position, RewardEvent};

const FRAME_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, AnchorSerialize, AnchorDeserialize)]
pub enum JournalEntry {
    Created(Position),
    Updated {
        position: Position,
        event: Option<RewardEvent>,
    },
}

pub trait Journal: Send + Sync {
    /// Durably appends one entry. On error nothing is appended.
    fn append(&self, entry: &JournalEntry) -> Result<()>;

    /// All entries in append order.
    fn load(&self) -> Result<Vec<JournalEntry>>;
}

/// Journal kept in process memory; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Journal for MemoryJournal {
    fn append(&self, entry: &JournalEntry) -> Result<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    fn load(&self) -> Result<Vec<JournalEntry>> {
        Ok(self.entries.lock().clone())
    }
}

#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    file: Mutex<File>,
    /// Set when a failed append could not be rolled back; the file may end
    /// in a partial frame, so further appends are refused.
    poisoned: AtomicBool,
}

impl FileJournal {
    /// Opens (or creates) the journal at `path`, dropping a torn trailing
    /// frame left by an interrupted write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let bytes = fs::read(&path)?;
        let valid_len = complete_frames_len(&bytes);
        if valid_len < bytes.len() {
            warn!(
                path = %path.display(),
                dropped = bytes.len() - valid_len,
                "Truncating torn journal tail"
            );
            file.set_len(valid_len as u64)?;
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
            poisoned: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Journal for FileJournal {
    fn append(&self, entry: &JournalEntry) -> Result<()> {
        let body = entry.try_to_vec()?;
        let len = u32::try_from(body.len()).map_err(|_| StakingError::MathOverflow)?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&body);

        let mut file = self.file.lock();
        if self.poisoned.load(Ordering::Acquire) {
            return Err(StakingError::Storage(format!(
                "journal {} holds an unrecovered partial write; restart to repair it",
                self.path.display()
            )));
        }
        let before = file.metadata()?.len();
        let written = (|| -> std::io::Result<()> {
            file.write_all(&frame)?;
            file.flush()?;
            file.sync_data()
        })();
        if let Err(err) = written {
            // Leave no partial frame behind for the next append to follow.
            if let Err(truncate_err) = file.set_len(before) {
                self.poisoned.store(true, Ordering::Release);
                error!(
                    path = %self.path.display(),
                    length = before,
                    "Failed to roll back partial journal write: {}",
                    truncate_err
                );
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn load(&self) -> Result<Vec<JournalEntry>> {
        let _guard = self.file.lock();
        let bytes = fs::read(&self.path)?;

        let mut entries = Vec::new();
        let mut offset = 0;
        while offset + FRAME_HEADER_LEN <= bytes.len() {
            let len = frame_len(&bytes[offset..]);
            let start = offset + FRAME_HEADER_LEN;
            let end = start + len;
            if end > bytes.len() {
                break;
            }
            let entry = JournalEntry::try_from_slice(&bytes[start..end]).map_err(|err| {
                StakingError::Storage(format!(
                    "corrupt journal frame at byte {} in {}: {}",
                    offset,
                    self.path.display(),
                    err
                ))
            })?;
            entries.push(entry);
            offset = end;
        }

        debug!(path = %self.path.display(), entries = entries.len(), "Loaded journal");
        Ok(entries)
    }
}

fn frame_len(bytes: &[u8]) -> usize {
    let mut header = [0u8; FRAME_HEADER_LEN];
    header.copy_from_slice(&bytes[..FRAME_HEADER_LEN]);
    u32::from_le_bytes(header) as usize
}

/// Length of the prefix of `bytes` made of complete frames.
fn complete_frames_len(bytes: &[u8]) -> usize {
    let mut offset = 0;
    while offset + FRAME_HEADER_LEN <= bytes.len() {
        let end = offset + FRAME_HEADER_LEN + frame_len(&bytes[offset..]);
        if end > bytes.len() {
            break;
        }
        offset = end;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{PoolId, PositionStatus, StakedAsset};

    fn position(seed: u8) -> Position {
        Position {
            id: Pubkey::new_from_array([seed; 32]),
            owner: Pubkey::new_from_array([1u8; 32]),
            pool_id: PoolId::new("P1").unwrap(),
            asset: StakedAsset::Nft {
                mint: Pubkey::new_from_array([2u8; 32]),
            },
            staked_at: 0,
            lock_expires_at: 0,
            accrued_rewards: 0,
            claimed_rewards: 0,
            forfeited_rewards: 0,
            last_checkpoint: 0,
            accrual_carry: 0,
            status: PositionStatus::Active,
            closed_at: None,
        }
    }

    #[test]
    fn test_file_journal_replays_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger").join("journal.bin");

        let first = JournalEntry::Created(position(10));
        let second = JournalEntry::Updated {
            position: position(10),
            event: Some(RewardEvent::accrual(Pubkey::new_from_array([10u8; 32]), 5, 60)),
        };

        {
            let journal = FileJournal::open(&path).unwrap();
            journal.append(&first).unwrap();
            journal.append(&second).unwrap();
        }

        let reopened = FileJournal::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap(), vec![first, second]);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.bin");

        let entry = JournalEntry::Created(position(3));
        {
            let journal = FileJournal::open(&path).unwrap();
            journal.append(&entry).unwrap();
        }

        // Simulate a crash halfway through the next frame.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&100u32.to_le_bytes()).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        drop(file);

        let journal = FileJournal::open(&path).unwrap();
        assert_eq!(journal.load().unwrap(), vec![entry.clone()]);

        // Appends after recovery land on a clean boundary.
        journal.append(&entry).unwrap();
        assert_eq!(journal.load().unwrap().len(), 2);
    }

    #[test]
    fn test_poisoned_journal_refuses_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.bin");
        let entry = JournalEntry::Created(position(5));

        let journal = FileJournal::open(&path).unwrap();
        journal.append(&entry).unwrap();
        journal.poisoned.store(true, Ordering::Release);

        let err = journal.append(&entry).unwrap_err();
        assert!(matches!(err, StakingError::Storage(_)));
        assert!(err.is_retryable());
        assert_eq!(journal.load().unwrap(), vec![entry.clone()]);

        // Reopening starts from a clean boundary again.
        drop(journal);
        let reopened = FileJournal::open(&path).unwrap();
        reopened.append(&entry).unwrap();
        assert_eq!(reopened.load().unwrap().len(), 2);
    }

    #[test]
    fn test_memory_journal() {
        let journal = MemoryJournal::new();
        journal.append(&JournalEntry::Created(position(4))).unwrap();
        assert_eq!(journal.load().unwrap().len(), 1);
    }
}
