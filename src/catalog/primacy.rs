//! Which release a track "belongs" to.
//!
//! Albums outrank EPs, EPs outrank singles, singles outrank compilations.
//! Between two releases of the same form the more recent one wins.

use super::{Project, ProjectForm};

impl ProjectForm {
    /// Lower rank = more primary.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Album => 0,
            Self::Ep => 1,
            Self::Single => 2,
            Self::Compilation => 3,
        }
    }
}

impl Project {
    /// True if `self` should give way to `other` as a track's primary project.
    ///
    /// Same-form releases on the same date are not ordered either way.
    pub fn is_less_primary_than(&self, other: &Project) -> bool {
        if self.form == other.form {
            self.release < other.release
        } else {
            self.form.rank() > other.form.rank()
        }
    }
}

/// Decide whether `candidate` should replace `current` as primary project.
/// A track with no primary project always promotes its first release.
pub fn should_promote(current: Option<&Project>, candidate: &Project) -> bool {
    match current {
        None => true,
        Some(current) => current.is_less_primary_than(candidate),
    }
}
