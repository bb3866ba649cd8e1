//! Tree walker and two-phase commit engine.
//!
//! [`run`] traverses a directory tree with parallel workers, rewrites every
//! candidate test file, and commits the results with an all-or-nothing
//! Phase 1: every changed file is first written to a fresh temp file next to
//! its original, and the first read/parse/stage failure aborts the whole
//! walk with all temp files removed and every original untouched. Only once
//! the entire tree has staged cleanly does Phase 2 rename each temp file
//! over its original. Phase 2 is best-effort: a failed rename is logged and
//! reported in the [`CommitReport`] but does not block the remaining
//! renames.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ignore::{WalkBuilder, WalkState};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info, warn};

use crate::error::{ParagenError, Result};
use crate::rewrite::rewrite;

/// Fixture-data directory name, ignored regardless of configuration.
pub const IMPLICIT_IGNORED_DIR: &str = "testdata";

/// Naming convention for Go test files.
const TEST_FILE_SUFFIX: &str = "_test.go";

/// Outcome of the commit phase of one walk.
#[derive(Debug, Default)]
pub struct CommitReport {
    /// Files whose rewritten content replaced the original.
    pub committed: Vec<PathBuf>,
    /// Files whose Phase-2 rename failed; their originals are unchanged but
    /// other files may already have been committed.
    pub failed: Vec<(PathBuf, std::io::Error)>,
}

/// Rewrite every candidate test file under `root`.
///
/// Directories whose base name appears in `ignore_dirs` (or is the implicit
/// `testdata`) are not descended into. Candidate files are read, rewritten,
/// and — when the output differs byte-for-byte — staged and committed under
/// the two-phase discipline described at module level.
pub fn run(
    root: &Path,
    ignore_dirs: &[String],
    fix_legacy_loop_capture: bool,
) -> Result<CommitReport> {
    let mut ignored: HashSet<String> = ignore_dirs
        .iter()
        .filter(|d| !d.is_empty())
        .cloned()
        .collect();
    ignored.insert(IMPLICIT_IGNORED_DIR.to_string());

    // Written concurrently by walker threads; entry order carries no meaning.
    let staged: Arc<Mutex<HashMap<PathBuf, TempPath>>> = Arc::new(Mutex::new(HashMap::new()));
    let first_err: Arc<Mutex<Option<ParagenError>>> = Arc::new(Mutex::new(None));

    let mut builder = WalkBuilder::new(root);
    builder.standard_filters(false).follow_links(false);
    builder.filter_entry(move |entry| {
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        !(is_dir
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| ignored.contains(name)))
    });

    builder.build_parallel().run(|| {
        let staged = Arc::clone(&staged);
        let first_err = Arc::clone(&first_err);
        Box::new(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => return fail(&first_err, ParagenError::Walk(err.to_string())),
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                return WalkState::Continue;
            }
            let path = entry.path();
            if !is_candidate(path) {
                return WalkState::Continue;
            }

            debug!(file = %path.display(), "analyzing");
            let src = match std::fs::read(path) {
                Ok(bytes) => bytes,
                Err(err) => return fail(&first_err, ParagenError::io(path, err)),
            };
            let rewritten =
                match rewrite(&path.to_string_lossy(), &src, fix_legacy_loop_capture) {
                    Ok(bytes) => bytes,
                    Err(err) => return fail(&first_err, err),
                };
            if rewritten == src {
                return WalkState::Continue;
            }

            match stage(path, &rewritten) {
                Ok(temp) => {
                    staged.lock().unwrap().insert(path.to_path_buf(), temp);
                    WalkState::Continue
                }
                Err(err) => fail(&first_err, err),
            }
        })
    });

    if let Some(err) = first_err.lock().unwrap().take() {
        // Dropping the staged temp paths unlinks them; originals untouched.
        staged.lock().unwrap().clear();
        return Err(err);
    }

    // Phase 2: every file staged cleanly, rename temps over originals.
    let staged = std::mem::take(&mut *staged.lock().unwrap());
    let report = commit(staged);
    info!(
        committed = report.committed.len(),
        failed = report.failed.len(),
        "walk complete"
    );
    Ok(report)
}

/// Rename every staged temp file over its original. Best-effort: a failed
/// rename is logged and collected, and the remaining renames still run.
fn commit(staged: HashMap<PathBuf, TempPath>) -> CommitReport {
    let mut report = CommitReport::default();
    for (path, temp) in staged {
        match temp.persist(&path) {
            Ok(()) => {
                info!(file = %path.display(), "rewrote");
                report.committed.push(path);
            }
            Err(err) => {
                warn!(file = %path.display(), error = %err.error, "rename failed");
                report.failed.push((path, err.error));
            }
        }
    }
    report
}

/// Record the walk's first error and stop all workers.
fn fail(slot: &Mutex<Option<ParagenError>>, err: ParagenError) -> WalkState {
    let mut guard = slot.lock().unwrap();
    if guard.is_none() {
        *guard = Some(err);
    }
    WalkState::Quit
}

/// Candidate test files: `.go` extension, `_test.go` naming convention.
fn is_candidate(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "go")
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(TEST_FILE_SUFFIX))
}

/// Write `bytes` to a fresh temp file in the target's directory, so the
/// later rename cannot cross filesystems.
fn stage(target: &Path, bytes: &[u8]) -> Result<TempPath> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| ParagenError::io(target, e))?;
    temp.write_all(bytes)
        .map_err(|e| ParagenError::io(target, e))?;
    Ok(temp.into_temp_path())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
