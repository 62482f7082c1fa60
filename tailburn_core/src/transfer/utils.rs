use super::constants::{MAX_FILENAME_LENGTH, PLACEHOLDER_FILE_NAME};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};

/// Format a byte count with binary units ("500 B", "1.5 KB", "1.0 MB")
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let prefix = b"KMGTPE"[exp] as char;
    format!("{:.1} {}B", bytes as f64 / div as f64, prefix)
}

/// Recover the file name from an `attachment; filename="..."` header value.
///
/// Returns `None` when the value carries no quoted file name.
pub fn parse_content_disposition(value: &str) -> Option<String> {
    let (_, rest) = value.split_once("filename=\"")?;
    let end = rest.find('"')?;
    let name = &rest[..end];
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

/// Sanitize a server-suggested file name so it stays inside the output directory
pub fn sanitize_file_name(file_name: &str) -> String {
    // 1. Keep only the last component for both separator styles
    let file_name = file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    // 2. Drop control characters
    let mut clean_name: String = file_name.chars().filter(|c| !c.is_control()).collect();

    // 3. Reject names that resolve to a directory or device
    let reserved_names = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if clean_name == ".."
        || clean_name == "."
        || clean_name.trim().is_empty()
        || reserved_names.iter().any(|&r| clean_name.eq_ignore_ascii_case(r))
    {
        return PLACEHOLDER_FILE_NAME.to_string();
    }

    // 4. Truncate on a char boundary, keeping a short extension when there is one
    if clean_name.len() > MAX_FILENAME_LENGTH {
        let ext = match clean_name.rfind('.') {
            Some(idx) if clean_name.len() - idx < 20 => clean_name[idx..].to_string(),
            _ => String::new(),
        };
        let mut cutoff = MAX_FILENAME_LENGTH - ext.len();
        while !clean_name.is_char_boundary(cutoff) {
            cutoff -= 1;
        }
        clean_name.truncate(cutoff);
        if !clean_name.ends_with(&ext) {
            clean_name.push_str(&ext);
        }
    }

    clean_name
}

/// Split "report.pdf" into ("report", ".pdf"). A leading dot is part of the base.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

fn is_taken(path: &Path) -> bool {
    // symlink_metadata so a dangling link still counts as taken
    std::fs::symlink_metadata(path).is_ok()
}

/// Pick an output path in `dir` that does not exist yet.
///
/// `name` is used verbatim when free, otherwise `base-1.ext`, `base-2.ext`, ...
/// are probed in order and the first free one wins.
pub fn safe_output_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !is_taken(&candidate) {
        return candidate;
    }

    let (base, ext) = split_extension(name);
    (1u64..)
        .map(|i| dir.join(format!("{}-{}{}", base, i, ext)))
        .find(|path| !is_taken(path))
        .unwrap_or(candidate)
}

/// Create a new file for `name` in `dir` without ever replacing an existing one.
///
/// The probe in [`safe_output_path`] is repeated if another writer claims the
/// chosen path first.
pub async fn create_unique_file(dir: &Path, name: &str) -> std::io::Result<(PathBuf, File)> {
    loop {
        let path = safe_output_path(dir, name);
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        match options.open(&path).await {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}
