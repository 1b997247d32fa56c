//! Ordered catalog of image identifiers with a circular cursor.

use std::fmt;
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage::{Storage, StorageEntry};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

/// Traversal policy for the catalog.
///
/// `OldestFirst`/`NewestFirst` order by identifier because storage
/// enumeration carries no timestamps; they are aliases of
/// `Ascending`/`Descending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SequenceMode {
    #[default]
    Ascending,
    Descending,
    Random,
    OldestFirst,
    NewestFirst,
}

impl SequenceMode {
    pub const ALL: [Self; 5] = [
        Self::Ascending,
        Self::Descending,
        Self::Random,
        Self::OldestFirst,
        Self::NewestFirst,
    ];

    /// Wire/persisted code (0..=4).
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Ascending => 0,
            Self::Descending => 1,
            Self::Random => 2,
            Self::OldestFirst => 3,
            Self::NewestFirst => 4,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Ascending),
            1 => Some(Self::Descending),
            2 => Some(Self::Random),
            3 => Some(Self::OldestFirst),
            4 => Some(Self::NewestFirst),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "ascending",
            Self::Descending => "descending",
            Self::Random => "random",
            Self::OldestFirst => "oldest-first",
            Self::NewestFirst => "newest-first",
        }
    }
}

impl fmt::Display for SequenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Return `true` when a storage entry is a catalog candidate.
#[must_use]
pub fn is_catalog_image(entry: &StorageEntry) -> bool {
    if entry.is_dir || entry.name.starts_with('.') || entry.name.starts_with('_') {
        return false;
    }
    Path::new(&entry.name)
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.iter().any(|e| *e == ext)
        })
}

/// In-memory ordered list of identifiers discovered on storage.
///
/// The cursor always indexes into `entries` when it is non-empty and is
/// reset to zero whenever the order changes.
#[derive(Debug)]
pub struct Catalog {
    entries: Vec<String>,
    cursor: usize,
    mode: SequenceMode,
    rng: StdRng,
}

impl Catalog {
    /// `seed` makes random mode deterministic; `None` seeds from the OS.
    #[must_use]
    pub fn new(mode: SequenceMode, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            entries: Vec::new(),
            cursor: 0,
            mode,
            rng,
        }
    }

    /// Clear and repopulate from storage, then apply the current mode.
    ///
    /// A count of zero is a valid catalog state.
    pub fn rescan(&mut self, storage: &dyn Storage) -> Result<usize, StorageError> {
        let listed = storage.entries()?;
        let count = self.rebuild(listed);
        info!(count, mode = %self.mode, "catalog rescanned");
        Ok(count)
    }

    /// Replace the sequence with the image entries of `listed`, preserving
    /// enumeration order before the mode is applied.
    pub fn rebuild(&mut self, listed: impl IntoIterator<Item = StorageEntry>) -> usize {
        self.entries.clear();
        for entry in listed {
            if is_catalog_image(&entry) {
                self.entries.push(entry.identifier());
            } else {
                debug!(name = %entry.name, "catalog: ignored entry");
            }
        }
        self.apply_sequence(self.mode);
        self.entries.len()
    }

    /// Reorder per `mode` and reset the cursor.
    pub fn apply_sequence(&mut self, mode: SequenceMode) {
        self.mode = mode;
        match mode {
            SequenceMode::Ascending | SequenceMode::OldestFirst => self.entries.sort(),
            SequenceMode::Descending | SequenceMode::NewestFirst => {
                self.entries.sort_by(|a, b| b.cmp(a));
            }
            SequenceMode::Random => self.entries.shuffle(&mut self.rng),
        }
        self.cursor = 0;
    }

    /// Move forward circularly and return the new current entry.
    ///
    /// Wrapping to zero in random mode reshuffles first. With fewer than two
    /// entries nothing moves.
    pub fn advance(&mut self) -> Option<&str> {
        if self.entries.len() < 2 {
            return self.current();
        }
        self.cursor = (self.cursor + 1) % self.entries.len();
        if self.cursor == 0 && self.mode == SequenceMode::Random {
            debug!("random cycle complete; reshuffling");
            self.apply_sequence(SequenceMode::Random);
        }
        self.current()
    }

    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.entries.get(self.cursor).map(String::as_str)
    }

    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn mode(&self) -> SequenceMode {
        self.mode
    }
}
