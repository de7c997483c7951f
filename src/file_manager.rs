//! # File Management Module
//!
//! Questo modulo gestisce la discovery delle immagini e la pianificazione dei task.
//!
//! ## Responsabilità:
//! - Discovery ricorsiva delle immagini supportate in una directory (`walkdir`)
//! - Filtro sulla dimensione minima (`processing.minFileSizeKB`)
//! - Calcolo del path di output di ogni file secondo la policy `output`
//! - Formattazione human-readable delle dimensioni
//!
//! ## Formati supportati:
//! - JPG/JPEG, PNG, WebP, AVIF (rilevati dall'estensione, case-insensitive)
//!
//! ## Policy di output (`TaskPlanner`):
//! - `overwriteOriginal`: l'output sostituisce l'input (stessa directory)
//! - `preserveStructure`: le sottodirectory dell'input vengono replicate sotto l'output
//! - `namingPattern`: nome del file con i token `{name}` (stem) e `{ext}` (es. `.jpg`)
//! - Conversione opzionale: l'estensione di output diventa quella del formato scelto
//! - Senza `overwriteOriginal` l'output non coincide mai con l'input: se il pattern
//!   produrrebbe lo stesso path si usa `{name}.optimized{ext}`
//! - Nessun path di output è condiviso da due task né coincide con l'input di un altro:
//!   in caso di collisione lo stem riceve un suffisso `-1`, `-2`, ...
//!
//! ## Esempio:
//! ```rust,ignore
//! let files = FileManager::discover(Path::new("/path/to/media"), 10)?;
//! let planner = TaskPlanner::new("/path/to/media", Some("/path/to/out".into()), &config.output);
//! let tasks = planner.plan_all(&files);
//! ```

use crate::config::OutputSettings;
use crate::format::ImageFormat;
use crate::task::ProcessingTask;
use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Prefix of the staging directories created next to outputs
const STAGING_PREFIX: &str = ".media-optimizer-";

/// Stem suffix used when the naming pattern would write over the input
const IN_PLACE_SUFFIX: &str = ".optimized";

/// A file found during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Path relative to the discovery root
    pub relative_path: PathBuf,
    pub size: u64,
}

/// Manages file discovery and size formatting
pub struct FileManager;

impl FileManager {
    /// Find all supported images under `root` that are at least `min_size_kb` KB
    pub fn discover(root: &Path, min_size_kb: u64) -> Result<Vec<DiscoveredFile>> {
        if !root.exists() {
            return Err(anyhow::anyhow!("Input path does not exist: {}", root.display()));
        }

        let min_size = min_size_kb * 1024;
        let mut files = Vec::new();
        let mut too_small = 0usize;

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !e.file_name().to_string_lossy().starts_with(STAGING_PREFIX));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !Self::is_supported_format(entry.path()) {
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    warn!("Cannot read metadata for {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            if size < min_size {
                too_small += 1;
                continue;
            }

            let path = entry.path().to_path_buf();
            let relative_path = match path.strip_prefix(root) {
                Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
                // root è il file stesso
                _ => PathBuf::from(entry.file_name()),
            };

            files.push(DiscoveredFile {
                path,
                relative_path,
                size,
            });
        }

        debug!(
            "Discovered {} images under {} ({} below {} KB)",
            files.len(),
            root.display(),
            too_small,
            min_size_kb
        );
        Ok(files)
    }

    /// Check if a file format is supported
    pub fn is_supported_format(path: &Path) -> bool {
        ImageFormat::from_path(path).is_some()
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }
}

/// Maps discovered files to `ProcessingTask`s according to the output policy
#[derive(Debug, Clone)]
pub struct TaskPlanner {
    input_root: PathBuf,
    output_root: Option<PathBuf>,
    policy: OutputSettings,
    convert_to: Option<ImageFormat>,
}

impl TaskPlanner {
    pub fn new(input_root: impl Into<PathBuf>, output_root: Option<PathBuf>, policy: &OutputSettings) -> Self {
        Self {
            input_root: input_root.into(),
            output_root,
            policy: policy.clone(),
            convert_to: None,
        }
    }

    /// Convert every file to `format` instead of keeping its own
    pub fn with_conversion(mut self, format: Option<ImageFormat>) -> Self {
        self.convert_to = format;
        self
    }

    /// Plan every file, keeping output paths unique across the batch
    pub fn plan_all(&self, files: &[DiscoveredFile]) -> Vec<ProcessingTask> {
        let inputs: HashSet<&Path> = files.iter().map(|f| f.path.as_path()).collect();
        let mut claimed: HashSet<PathBuf> = HashSet::with_capacity(files.len());
        let mut tasks = Vec::with_capacity(files.len());

        for file in files {
            let mut task = self.plan(file);
            // un task può riscrivere solo il proprio input
            let taken = |candidate: &Path, claimed: &HashSet<PathBuf>| {
                claimed.contains(candidate)
                    || (candidate != file.path.as_path() && inputs.contains(candidate))
            };

            if taken(&task.output_path, &claimed) {
                let mut n = 1;
                while taken(&numbered(&task.output_path, n), &claimed) {
                    n += 1;
                }
                let unique = numbered(&task.output_path, n);
                warn!(
                    "Output {} is already used in this batch, writing {} to {}",
                    task.output_path.display(),
                    file.path.display(),
                    unique.display()
                );
                task.output_path = unique;
            }

            claimed.insert(task.output_path.clone());
            tasks.push(task);
        }
        tasks
    }

    pub fn plan(&self, file: &DiscoveredFile) -> ProcessingTask {
        let ext = self.output_extension(&file.path);

        let output_path = if self.policy.overwrite_original {
            match self.convert_to {
                Some(_) => file.path.with_file_name(format!("{}{}", stem(&file.path), ext)),
                None => file.path.clone(),
            }
        } else {
            let file_name = self.apply_pattern(&file.path, &ext);
            let planned = self.output_dir(file).join(file_name);
            if planned == file.path {
                file.path
                    .with_file_name(format!("{}{}{}", stem(&file.path), IN_PLACE_SUFFIX, ext))
            } else {
                planned
            }
        };

        debug!("Planned {} -> {}", file.path.display(), output_path.display());
        ProcessingTask::new(&file.path, output_path, &file.relative_path)
    }

    /// `.ext` of the output: conversion target, or the input's own extension
    fn output_extension(&self, input: &Path) -> String {
        match self.convert_to {
            Some(format) => format!(".{}", format.extension()),
            None => input
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
                .unwrap_or_default(),
        }
    }

    fn apply_pattern(&self, input: &Path, ext: &str) -> String {
        let pattern = &self.policy.naming_pattern;
        let name = pattern.replace("{name}", &stem(input));
        if pattern.contains("{ext}") {
            name.replace("{ext}", ext)
        } else {
            format!("{}{}", name, ext)
        }
    }

    fn output_dir(&self, file: &DiscoveredFile) -> PathBuf {
        let Some(ref output_root) = self.output_root else {
            return file
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.input_root.clone());
        };

        if self.policy.preserve_structure {
            match file.relative_path.parent() {
                Some(parent) => output_root.join(parent),
                None => output_root.clone(),
            }
        } else {
            output_root.clone()
        }
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `dir/photo.jpg` -> `dir/photo-n.jpg`
fn numbered(path: &Path, n: usize) -> PathBuf {
    let ext = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    path.with_file_name(format!("{}-{}{}", stem(path), n, ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path, bytes: usize) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, vec![0u8; bytes]).unwrap();
    }

    fn discovered(root: &str, rel: &str) -> DiscoveredFile {
        DiscoveredFile {
            path: Path::new(root).join(rel),
            relative_path: PathBuf::from(rel),
            size: 1,
        }
    }

    #[test]
    fn test_discover_filters_format_and_size() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        touch(&root.join("a.jpg"), 2048);
        touch(&root.join("sub/b.PNG"), 4096);
        touch(&root.join("sub/tiny.webp"), 10);
        touch(&root.join("notes.txt"), 4096);
        touch(&root.join(".media-optimizer-abc/staged.jpg"), 4096);

        let files = FileManager::discover(root, 1).unwrap();
        let relative: Vec<_> = files.iter().map(|f| f.relative_path.clone()).collect();

        assert_eq!(relative, vec![PathBuf::from("a.jpg"), PathBuf::from("sub/b.PNG")]);
        assert_eq!(files[1].size, 4096);
    }

    #[test]
    fn test_discover_missing_root() {
        assert!(FileManager::discover(Path::new("/definitely/not/here"), 0).is_err());
    }

    #[test]
    fn test_plan_preserves_structure() {
        let planner = TaskPlanner::new("/in", Some(PathBuf::from("/out")), &OutputSettings::default());
        let task = planner.plan(&discovered("/in", "2024/trip/photo.jpg"));

        assert_eq!(task.output_path, PathBuf::from("/out/2024/trip/photo.jpg"));
        assert_eq!(task.relative_path, PathBuf::from("2024/trip/photo.jpg"));
    }

    #[test]
    fn test_plan_flat_with_pattern_and_conversion() {
        let policy = OutputSettings {
            preserve_structure: false,
            naming_pattern: "{name}-min{ext}".to_string(),
            ..OutputSettings::default()
        };
        let planner = TaskPlanner::new("/in", Some(PathBuf::from("/out")), &policy)
            .with_conversion(Some(ImageFormat::Webp));
        let task = planner.plan(&discovered("/in", "sub/photo.JPG"));

        assert_eq!(task.output_path, PathBuf::from("/out/photo-min.webp"));
    }

    #[test]
    fn test_plan_overwrite_original() {
        let policy = OutputSettings {
            overwrite_original: true,
            ..OutputSettings::default()
        };
        let planner = TaskPlanner::new("/in", Some(PathBuf::from("/out")), &policy);
        let task = planner.plan(&discovered("/in", "sub/photo.png"));
        assert_eq!(task.output_path, task.input_path);

        let planner = planner.with_conversion(Some(ImageFormat::Avif));
        let task = planner.plan(&discovered("/in", "sub/photo.png"));
        assert_eq!(task.output_path, PathBuf::from("/in/sub/photo.avif"));
    }

    #[test]
    fn test_pattern_without_ext_token() {
        let policy = OutputSettings {
            naming_pattern: "opt_{name}".to_string(),
            ..OutputSettings::default()
        };
        let planner = TaskPlanner::new("/in", None, &policy);
        let task = planner.plan(&discovered("/in", "a.jpeg"));
        assert_eq!(task.output_path, PathBuf::from("/in/opt_a.jpeg"));
    }

    #[test]
    fn test_default_policy_never_targets_the_input() {
        let defaults = OutputSettings::default();
        let task = TaskPlanner::new("/in", None, &defaults).plan(&discovered("/in", "sub/photo.jpg"));
        assert_ne!(task.output_path, task.input_path);
        assert_eq!(task.output_path, PathBuf::from("/in/sub/photo.optimized.jpg"));

        // --output uguale alla directory di input
        let planner = TaskPlanner::new("/in", Some(PathBuf::from("/in")), &defaults);
        let task = planner.plan(&discovered("/in", "sub/photo.jpg"));
        assert_eq!(task.output_path, PathBuf::from("/in/sub/photo.optimized.jpg"));
    }

    #[test]
    fn test_flat_layout_gets_unique_names() {
        let policy = OutputSettings {
            preserve_structure: false,
            ..OutputSettings::default()
        };
        let planner = TaskPlanner::new("/in", Some(PathBuf::from("/out")), &policy);
        let tasks = planner.plan_all(&[
            discovered("/in", "a/x.jpg"),
            discovered("/in", "b/x.jpg"),
            discovered("/in", "c/x.jpg"),
        ]);

        let outputs: Vec<_> = tasks.iter().map(|t| t.output_path.clone()).collect();
        assert_eq!(
            outputs,
            vec![
                PathBuf::from("/out/x.jpg"),
                PathBuf::from("/out/x-1.jpg"),
                PathBuf::from("/out/x-2.jpg"),
            ]
        );
    }

    #[test]
    fn test_conversion_in_place_does_not_share_outputs() {
        let policy = OutputSettings {
            overwrite_original: true,
            ..OutputSettings::default()
        };
        let planner = TaskPlanner::new("/in", None, &policy).with_conversion(Some(ImageFormat::Avif));
        let tasks = planner.plan_all(&[
            discovered("/in", "photo.avif"),
            discovered("/in", "photo.jpg"),
            discovered("/in", "photo.png"),
        ]);

        // photo.avif può riscrivere se stesso, gli altri no
        assert_eq!(tasks[0].output_path, PathBuf::from("/in/photo.avif"));
        assert_eq!(tasks[1].output_path, PathBuf::from("/in/photo-1.avif"));
        assert_eq!(tasks[2].output_path, PathBuf::from("/in/photo-2.avif"));
    }

    #[test]
    fn test_output_never_lands_on_another_input() {
        let planner = TaskPlanner::new("/in", None, &OutputSettings::default());
        let tasks = planner.plan_all(&[
            discovered("/in", "photo.jpg"),
            discovered("/in", "photo.optimized.jpg"),
        ]);

        assert_eq!(tasks[0].output_path, PathBuf::from("/in/photo.optimized-1.jpg"));
        assert_eq!(tasks[1].output_path, PathBuf::from("/in/photo.optimized.optimized.jpg"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(FileManager::format_size(512), "512 B");
        assert_eq!(FileManager::format_size(1536), "1.50 KB");
        assert_eq!(FileManager::format_size(5 * 1024 * 1024), "5.00 MB");
    }
}
