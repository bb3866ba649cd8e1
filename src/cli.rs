//! Command-line surface.

use std::path::PathBuf;

use clap::Parser;

/// Go release that introduced per-iteration loop variable scoping. Below
/// this, subtests launched from a range loop need an explicit `v := v`.
const LOOP_SCOPING_VERSION: f64 = 1.22;

/// Inserts `testing.T.Parallel()` into test functions and subtests across a
/// Go source tree.
#[derive(Debug, Parser)]
#[command(name = "paragen", version)]
pub struct Cli {
    /// Root directory to rewrite.
    #[arg(default_value = ".", value_name = "PATH")]
    pub path: PathBuf,

    /// Directory names to skip, comma separated (testdata is always skipped).
    #[arg(short, long, value_delimiter = ',', value_name = "NAMES")]
    pub ignore: Vec<String>,

    /// Minimum Go version the rewritten tree must support.
    #[arg(long, value_name = "VERSION", default_value_t = 1.21)]
    pub min_go_version: f64,
}

impl Cli {
    /// Whether range-loop value variables must be rebound for safe capture.
    #[must_use]
    pub fn fix_legacy_loop_capture(&self) -> bool {
        self.min_go_version < LOOP_SCOPING_VERSION
    }
}
