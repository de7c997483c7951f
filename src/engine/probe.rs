//! # Capability Probe
//!
//! Decide una volta per batch quale engine usare e lo restituisce come valore:
//! nessuno stato globale, nessun singleton.
//!
//! ## Strategia di selezione
//! 1. **Primary** (ImageMagick): `magick` (7.x) o `convert` (6.x), cercati in
//!    `TOOLS_DIR` e poi nel `PATH`; il tool viene confermato eseguendo `-version`
//! 2. **Fallback** (crate `image`): disponibile se almeno un encoder dei formati
//!    supportati è compilato nel binario
//! 3. **Unavailable**: nessuno dei due; l'orchestratore rifiuta il batch
//!
//! Entrambi gli engine possono essere disabilitati (es. `--engine fallback`).

use super::fallback::FallbackEngine;
use super::primary::PrimaryEngine;
use super::Engine;
use std::env;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// ImageMagick executables in order of preference
const PRIMARY_CANDIDATES: &[&str] = &["magick", "convert"];

/// Finds external tools either in a bundled tools directory or on `PATH`
#[derive(Debug, Clone, Default)]
pub struct ToolPathResolver {
    /// Directory checked before `PATH` (from `TOOLS_DIR` when set)
    tools_dir: Option<PathBuf>,
}

impl ToolPathResolver {
    pub fn new() -> Self {
        let tools_dir = env::var_os("TOOLS_DIR")
            .map(PathBuf::from)
            .filter(|dir| dir.is_dir());

        if let Some(ref dir) = tools_dir {
            debug!("Using tools directory from TOOLS_DIR: {}", dir.display());
        }

        Self { tools_dir }
    }

    pub fn with_tools_dir(tools_dir: impl Into<PathBuf>) -> Self {
        Self {
            tools_dir: Some(tools_dir.into()),
        }
    }

    /// Resolve the path to a specific tool
    pub fn resolve_tool(&self, tool_name: &str) -> Option<PathBuf> {
        let file_name = executable_name(tool_name);

        if let Some(ref tools_dir) = self.tools_dir {
            let bundled = tools_dir.join(&file_name);
            if bundled.is_file() {
                debug!("Using bundled tool: {} -> {}", tool_name, bundled.display());
                return Some(bundled);
            }
        }

        let found = env::var_os("PATH").and_then(|paths| {
            env::split_paths(&paths)
                .map(|dir| dir.join(&file_name))
                .find(|candidate| candidate.is_file())
        });

        match found {
            Some(ref path) => debug!("Using system tool: {} -> {}", tool_name, path.display()),
            None => debug!("Tool not found: {}", tool_name),
        }
        found
    }
}

fn executable_name(tool_name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", tool_name)
    } else {
        tool_name.to_string()
    }
}

/// Per-batch engine detection
#[derive(Debug, Clone)]
pub struct CapabilityProbe {
    resolver: ToolPathResolver,
    primary_enabled: bool,
    fallback_enabled: bool,
}

impl Default for CapabilityProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityProbe {
    pub fn new() -> Self {
        Self {
            resolver: ToolPathResolver::new(),
            primary_enabled: true,
            fallback_enabled: true,
        }
    }

    pub fn with_resolver(mut self, resolver: ToolPathResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn primary_enabled(mut self, enabled: bool) -> Self {
        self.primary_enabled = enabled;
        self
    }

    pub fn fallback_enabled(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    /// Rileva l'engine migliore disponibile
    pub async fn detect(&self) -> Engine {
        if self.primary_enabled {
            for tool in PRIMARY_CANDIDATES {
                let Some(path) = self.resolver.resolve_tool(tool) else {
                    continue;
                };
                if confirm_imagemagick(&path).await {
                    info!("Engine: primary (ImageMagick via {})", path.display());
                    return Engine::Primary(PrimaryEngine::new(*tool, path));
                }
                debug!("{} found at {} but is not ImageMagick", tool, path.display());
            }
        }

        if self.fallback_enabled && FallbackEngine::prerequisites_met() {
            info!("Engine: fallback (built-in image codecs)");
            return Engine::Fallback(FallbackEngine::new());
        }

        warn!(
            "No transformation engine available (primary enabled: {}, fallback enabled: {})",
            self.primary_enabled, self.fallback_enabled
        );
        Engine::Unavailable
    }
}

/// Runs `<tool> -version` and checks that it really is ImageMagick
///
/// On Windows `convert.exe` is also a filesystem utility, hence the banner check.
async fn confirm_imagemagick(path: &Path) -> bool {
    match Command::new(path).arg("-version").output().await {
        Ok(output) => {
            output.status.success()
                && String::from_utf8_lossy(&output.stdout).contains("ImageMagick")
        }
        Err(e) => {
            debug!("Failed to run {} -version: {}", path.display(), e);
            false
        }
    }
}
