//! Helper condivisi dai test degli engine: immagini con EXIF e finto ImageMagick.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};
use std::path::{Path, PathBuf};

/// Write a JPEG whose stored pixels are `width`x`height`, tagged with EXIF `orientation`
pub fn write_jpeg_with_orientation(
    dir: &Path,
    name: &str,
    width: u32,
    height: u32,
    orientation: u8,
) -> PathBuf {
    // TIFF big-endian, un solo IFD con il tag 0x0112 (Orientation, SHORT)
    let mut exif = b"MM\x00\x2a\x00\x00\x00\x08\x00\x01".to_vec();
    exif.extend_from_slice(&[0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
    exif.extend_from_slice(&[0x00, orientation, 0x00, 0x00]);
    exif.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 120]));
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, 90);
    encoder.set_exif_metadata(exif).unwrap();
    encoder
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();

    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Install an executable `magick` script in `dir`.
///
/// `-version` answers like ImageMagick 7; any other call runs `conversion`
/// with `$out` set to the staged output path (format prefix removed).
#[cfg(unix)]
pub fn install_fake_magick(dir: &Path, conversion: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = format!(
        "#!/bin/sh\n\
         if [ \"$1\" = \"-version\" ]; then\n\
         \techo \"Version: ImageMagick 7.1.1-21 Q16-HDRI x86_64\"\n\
         \texit 0\n\
         fi\n\
         for last; do :; done\n\
         out=\"${{last#*:}}\"\n\
         {}\n",
        conversion
    );

    let path = dir.join("magick");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    // ETXTBSY: un fork concorrente può tenere aperto il file appena scritto
    for _ in 0..50 {
        match std::process::Command::new(&path).arg("-version").output() {
            Err(e) if e.raw_os_error() == Some(26) => {
                std::thread::sleep(std::time::Duration::from_millis(10))
            }
            _ => break,
        }
    }
    path
}
