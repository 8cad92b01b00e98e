//! Unified-diff line accounting shared by both adapters.

use crate::model::FileChange;

/// Counts added and removed lines in a unified diff. File header lines
/// (`+++`/`---`) are not content changes and are excluded.
pub fn count_diff_lines(diff: &str) -> (u64, u64) {
    let mut additions: u64 = 0;
    let mut deletions: u64 = 0;
    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if line.starts_with('+') {
            additions = additions.saturating_add(1);
        } else if line.starts_with('-') {
            deletions = deletions.saturating_add(1);
        }
    }
    (additions, deletions)
}

/// Totals per-file counts into the entity-level addition/deletion pair.
pub fn sum_file_changes(files: &[FileChange]) -> (u64, u64) {
    files.iter().fold((0, 0), |(added, removed), file| {
        (
            added.saturating_add(file.additions),
            removed.saturating_add(file.deletions),
        )
    })
}
