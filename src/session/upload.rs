// Upload filter: decides which client file names become tracks.

/// Accepted audio extensions (compared case-insensitively)
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "aiff"];

/// A client file name that passed the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadName {
    /// Path-safe name used inside scratch storage (separators replaced by `_`)
    pub handle: String,
    /// Final path segment of the original name, used when exporting
    pub display_name: String,
}

/// Filter and sanitize a client-supplied file name.
///
/// Rejects empty names, macOS resource-fork files (`._*`) and anything without
/// a supported extension. Folder uploads send names like `Set/track.mp3`;
/// separators are flattened so the handle can never leave the scratch dir.
pub fn accept(file_name: &str) -> Option<UploadName> {
    let trimmed = file_name.trim();
    if trimmed.is_empty() {
        return None;
    }

    let display_name = trimmed
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(trimmed)
        .to_string();
    if display_name.to_lowercase().starts_with("._") {
        return None;
    }
    if !has_supported_extension(&display_name) {
        return None;
    }

    let handle: String = trimmed
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            '\0' => '_',
            c => c,
        })
        .collect();
    if handle == "." || handle == ".." {
        return None;
    }

    Some(UploadName {
        handle,
        display_name,
    })
}

pub fn has_supported_extension(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        }
        _ => false,
    }
}
