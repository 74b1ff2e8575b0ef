//! Stable identity of one unit of work.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SweepError;

/// Identity of a pull request: repository plus item number.
///
/// Renders as `owner/repo#number`, which is also the key used in
/// `attempts.json` and on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    /// Repository in `owner/repo` form
    pub source: String,
    /// Pull request number within the repository
    pub item_id: u64,
}

impl JobKey {
    pub fn new(source: impl Into<String>, item_id: u64) -> Self {
        Self {
            source: source.into(),
            item_id,
        }
    }

    /// Filesystem-safe name, unique per key.
    ///
    /// `acme/my.repo#1` becomes `acme.my_2erepo-pr1`.
    pub fn slug(&self) -> String {
        format!("{}-pr{}", escape_name(&self.source), self.item_id)
    }

    /// Owner half of the repository name.
    pub fn owner(&self) -> &str {
        self.source.split('/').next().unwrap_or(&self.source)
    }
}

/// Reversible mapping of a name onto `[A-Za-z0-9._-]`.
///
/// ASCII letters, digits and `-` are kept, `/` becomes `.`, and every other
/// byte (including `.` and `_`) is written as `_` plus two hex digits. Distinct
/// inputs always give distinct outputs.
pub fn escape_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'/' => out.push('.'),
            b if b.is_ascii_alphanumeric() || b == b'-' => out.push(b as char),
            b => out.push_str(&format!("_{:02x}", b)),
        }
    }
    out
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source, self.item_id)
    }
}

impl FromStr for JobKey {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, id) = s
            .rsplit_once('#')
            .ok_or_else(|| SweepError::InvalidKey(format!("{} (expected owner/repo#number)", s)))?;

        let mut parts = source.split('/');
        let valid_source = matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty()
        );
        if !valid_source {
            return Err(SweepError::InvalidKey(format!("{} (source must be owner/repo)", s)));
        }

        let item_id = id
            .parse::<u64>()
            .map_err(|_| SweepError::InvalidKey(format!("{} (item must be a number)", s)))?;

        Ok(Self::new(source, item_id))
    }
}
