//! # Supported Formats
//!
//! Formati immagine gestiti dalla pipeline e relativo rilevamento dall'estensione.
//! L'estensione è l'unica fonte di verità: non si ispeziona il contenuto del file.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Avif,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 4] = [Self::Jpeg, Self::Png, Self::Webp, Self::Avif];

    /// Rileva il formato dall'estensione del path (case-insensitive)
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::from_extension(ext)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            "avif" => Some(Self::Avif),
            _ => None,
        }
    }

    /// Chiave della sezione in `defaultSettings`
    pub fn key(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Avif => "avif",
        }
    }

    /// Estensione canonica usata quando si converte verso questo formato
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Avif => "avif",
        }
    }

    pub fn as_image_format(&self) -> image::ImageFormat {
        match self {
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
            Self::Webp => image::ImageFormat::WebP,
            Self::Avif => image::ImageFormat::Avif,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::Webp => "WebP",
            Self::Avif => "AVIF",
        };
        f.write_str(name)
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s.trim_start_matches('.'))
            .ok_or_else(|| format!("unknown image format: {s}"))
    }
}

/// Etichetta dell'estensione per i messaggi di errore (es. `.txt`)
pub fn extension_label(path: &Path) -> String {
    match path.extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => "(no extension)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path_is_case_insensitive() {
        assert_eq!(ImageFormat::from_path(Path::new("a/B.JPG")), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_path(Path::new("b.jpeg")), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_path(Path::new("c.Avif")), Some(ImageFormat::Avif));
        assert_eq!(ImageFormat::from_path(Path::new("notes.txt")), None);
        assert_eq!(ImageFormat::from_path(Path::new("README")), None);
    }

    #[test]
    fn test_from_str_accepts_leading_dot() {
        assert_eq!(".webp".parse::<ImageFormat>(), Ok(ImageFormat::Webp));
        assert!("gif".parse::<ImageFormat>().is_err());
    }

    #[test]
    fn test_extension_label() {
        assert_eq!(extension_label(Path::new("x/notes.txt")), ".txt");
        assert_eq!(extension_label(Path::new("Makefile")), "(no extension)");
    }
}
