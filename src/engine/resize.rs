//! # Resize Policy
//!
//! Calcolo puro delle dimensioni di output, condiviso da entrambi gli engine.
//!
//! ## Regole
//! - Il resize scatta solo se almeno una dimensione supera il massimo configurato
//! - Mai upscaling
//! - Aspect ratio preservato: si calcolano i fattori di scala per larghezza e altezza,
//!   vince il più piccolo; il lato vincolante prende esattamente il massimo,
//!   l'altro viene arrotondato proporzionalmente (round-half-up)
//! - Le dimensioni di output sono sempre note, anche senza resize
//! - Le dimensioni sorgente sono quelle *visualizzate*: con orientamento EXIF a 90°/270°
//!   larghezza e altezza vengono scambiate prima del calcolo (`Dimensions::oriented`)
//!
//! ```text
//! 4000x3000, max 2048x2048 -> 2048x1536 (vincolo sulla larghezza)
//! 1024x768,  max 2048x2048 -> 1024x768  (nessun resize)
//! ```

use crate::config::MaxDimensions;
use image::metadata::Orientation;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions as displayed once `orientation` has been applied
    pub fn oriented(self, orientation: Orientation) -> Self {
        match orientation {
            Orientation::Rotate90
            | Orientation::Rotate270
            | Orientation::Rotate90FlipH
            | Orientation::Rotate270FlipH => Self::new(self.height, self.width),
            _ => self,
        }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Source and target dimensions for one transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePlan {
    pub source: Dimensions,
    pub target: Dimensions,
}

impl ResizePlan {
    pub fn compute(source: Dimensions, max: MaxDimensions) -> Self {
        Self {
            source,
            target: fit_within(source, max),
        }
    }

    pub fn is_resize(&self) -> bool {
        self.source != self.target
    }

    /// Geometry string per ImageMagick: dimensioni esatte, già calcolate qui
    pub fn imagemagick_geometry(&self) -> String {
        format!("{}x{}!", self.target.width, self.target.height)
    }
}

/// Scale `source` down to fit inside `max`, preserving aspect ratio
pub fn fit_within(source: Dimensions, max: MaxDimensions) -> Dimensions {
    let Dimensions { width, height } = source;

    if width == 0 || height == 0 || (width <= max.width && height <= max.height) {
        return source;
    }

    let scale_w = max.width as f64 / width as f64;
    let scale_h = max.height as f64 / height as f64;

    if scale_w <= scale_h {
        let scaled = round_half_up(height as f64 * max.width as f64 / width as f64);
        Dimensions::new(max.width, scaled.clamp(1, max.height))
    } else {
        let scaled = round_half_up(width as f64 * max.height as f64 / height as f64);
        Dimensions::new(scaled.clamp(1, max.width), max.height)
    }
}

fn round_half_up(value: f64) -> u32 {
    (value + 0.5).floor() as u32
}
