//! Tool discovery for the bundled LP tools.
//!
//! `lpmake` and `lpdump` ship next to the application in release bundles, so
//! the search is bundled-first: the packaged `lptools/` directory beside our own
//! executable, that directory itself, the development prebuilt trees, system
//! install prefixes, and finally `PATH`. When nothing matches the bare tool name
//! is returned and the spawn error surfaces later.

use std::path::{Path, PathBuf};

/// Subdirectory of the executable's directory that release bundles use.
pub const BUNDLED_TOOLS_DIR: &str = "lptools";

/// Prebuilt tool tree used by development checkouts.
pub const PREBUILT_TOOLS_DIR: &str = "lptools-prebuilt";

/// External LP tools this crate drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Builds super images
    Lpmake,
    /// Dumps LP metadata of an existing image
    Lpdump,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Lpmake => "lpmake",
            Tool::Lpdump => "lpdump",
        }
    }

    /// Platform file name (`.exe` on Windows).
    pub fn file_name(&self) -> String {
        if cfg!(windows) {
            format!("{}.exe", self.name())
        } else {
            self.name().to_string()
        }
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolves the executable used for a [`Tool`].
///
/// Never fails: an unresolvable tool maps to its bare name so the failure is
/// reported by the spawn itself.
pub trait ToolLocator: Send + Sync {
    fn locate(&self, tool: Tool) -> PathBuf;
}

/// Bundled-first search relative to the running executable.
#[derive(Debug, Clone)]
pub struct BundledToolLocator {
    exe_dir: Option<PathBuf>,
}

impl BundledToolLocator {
    /// Anchor the search at the directory of the current executable.
    pub fn new() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf));
        Self { exe_dir }
    }

    /// Anchor the search at an explicit directory.
    pub fn with_exe_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            exe_dir: Some(dir.into()),
        }
    }

    /// Candidate locations, in priority order, excluding the `PATH` lookup.
    pub fn candidates(&self, tool: Tool) -> Vec<PathBuf> {
        let file_name = tool.file_name();
        let platform = if cfg!(windows) { "win" } else { "linux" };
        let mut candidates = Vec::new();

        if let Some(exe_dir) = &self.exe_dir {
            candidates.push(exe_dir.join(BUNDLED_TOOLS_DIR).join(&file_name));
            candidates.push(exe_dir.join(&file_name));
            // target/<profile>/ sits one or two levels below the checkout
            for up in [exe_dir.parent(), exe_dir.parent().and_then(Path::parent)]
                .into_iter()
                .flatten()
            {
                candidates.push(up.join(PREBUILT_TOOLS_DIR).join(platform).join(&file_name));
            }
        }

        if cfg!(unix) {
            candidates.push(Path::new("/usr/local/bin").join(&file_name));
            candidates.push(Path::new("/usr/bin").join(&file_name));
        }

        candidates
    }
}

impl Default for BundledToolLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolLocator for BundledToolLocator {
    fn locate(&self, tool: Tool) -> PathBuf {
        if let Some(found) = self.candidates(tool).into_iter().find(|p| is_executable(p)) {
            log::debug!("[Paths] {} resolved to {}", tool, found.display());
            return found;
        }

        if let Ok(found) = which::which(tool.file_name()) {
            log::debug!("[Paths] {} found on PATH at {}", tool, found.display());
            return found;
        }

        log::warn!("[Paths] {} not found, falling back to bare name", tool);
        PathBuf::from(tool.file_name())
    }
}

/// Locator returning fixed paths; used by tests and by callers that take tool
/// locations from the command line.
#[derive(Debug, Clone)]
pub struct FixedToolLocator {
    pub lpmake: PathBuf,
    pub lpdump: PathBuf,
}

impl FixedToolLocator {
    pub fn new(lpmake: impl Into<PathBuf>, lpdump: impl Into<PathBuf>) -> Self {
        Self {
            lpmake: lpmake.into(),
            lpdump: lpdump.into(),
        }
    }
}

impl ToolLocator for FixedToolLocator {
    fn locate(&self, tool: Tool) -> PathBuf {
        match tool {
            Tool::Lpmake => self.lpmake.clone(),
            Tool::Lpdump => self.lpdump.clone(),
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
