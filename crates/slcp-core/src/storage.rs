//! Persist received images to disk.

use crate::media::ImageKind;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Build the file name for a received image: `<ip>_<unix seconds>_<sender>.<ext>`.
///
/// The sender is reduced to `[A-Za-z0-9_-]` so a hostile handle cannot
/// escape the image directory. Unrecognised data is stored as `.jpg`.
pub fn image_file_name(
    sender_ip: IpAddr,
    received_at: DateTime<Utc>,
    sender: &str,
    kind: Option<ImageKind>,
) -> String {
    let sender: String = sender
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    // IPv6 colons are not portable in file names.
    let ip = sender_ip.to_string().replace(':', "-");
    format!(
        "{}_{}_{}.{}",
        ip,
        received_at.timestamp(),
        sender,
        kind.unwrap_or(ImageKind::Jpeg).extension()
    )
}

/// Write `bytes` to `dir/name`, creating `dir` if needed.
///
/// Never overwrites: if the name is taken, `-1`, `-2`, ... is appended to the stem.
pub fn save_image(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create image directory {}", dir.display()))?;

    let candidate = Path::new(name);
    let stem = candidate
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image")
        .to_string();
    let ext = candidate.extension().and_then(|e| e.to_str()).unwrap_or("jpg");

    let mut attempt = 0usize;
    loop {
        let file_name = if attempt == 0 {
            format!("{stem}.{ext}")
        } else {
            format!("{stem}-{attempt}.{ext}")
        };
        let path = dir.join(file_name);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(bytes)
                    .with_context(|| format!("failed to write image to {}", path.display()))?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to create image file {}", path.display()));
            }
        }
    }
}
