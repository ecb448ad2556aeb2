//! The standard coding tool set: write, read, edit, bash.

mod args;
mod bash;
mod edit;
mod read;
mod truncate;
mod write;

use std::path::PathBuf;
use std::sync::Arc;

use phi_agent::Tool;

pub use bash::BashTool;
pub use edit::EditTool;
pub use read::ReadFileTool;
pub use truncate::{Truncation, format_size, truncate_head, truncate_tail};
pub use write::WriteFileTool;

pub(crate) const DEFAULT_MAX_LINES: usize = 2000;
pub(crate) const DEFAULT_MAX_BYTES: usize = 50 * 1024;

/// All four coding tools rooted at `cwd`.
pub fn coding_tools(cwd: impl Into<PathBuf>) -> Vec<Arc<dyn Tool>> {
    let cwd = cwd.into();
    vec![
        Arc::new(WriteFileTool::new(cwd.clone())),
        Arc::new(ReadFileTool::new(cwd.clone())),
        Arc::new(EditTool::new(cwd.clone())),
        Arc::new(BashTool::new(cwd, None)),
    ]
}
