//! Scratch files exchanged with runtime subprocesses.
//!
//! Every execution writes its driver script (and, for file-marshaling
//! backends, the HTML document and cookie list) to named temporary files.
//! Files are deleted when the wrapper is dropped so long-running processes
//! issuing thousands of calls do not leak scratch files.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::Result;

/// Named temporary file with its content written up front.
///
/// The file stays on disk for the lifetime of the wrapper and can be
/// re-read or rewritten after a subprocess has mutated it.
pub struct ScratchFile {
    file: NamedTempFile,
}

impl ScratchFile {
    /// Create a scratch file containing `content`, with the given filename
    /// suffix (some engines sniff the extension).
    pub fn with_content(content: &str, suffix: &str) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("jsdispatch-")
            .suffix(suffix)
            .tempfile()?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Path as a UTF-8 string for embedding into generated scripts.
    pub fn path_str(&self) -> String {
        self.file.path().to_string_lossy().into_owned()
    }

    /// Read the file back, typically after a subprocess rewrote it.
    pub fn read(&self) -> Result<String> {
        Ok(std::fs::read_to_string(self.path())?)
    }
}

/// Short unique suffix for generated identifiers embedded in driver
/// scripts, so page code cannot guess and shadow them.
pub(crate) fn random_suffix() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{:x}{:x}", std::process::id(), nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_file_round_trip() {
        let file = ScratchFile::with_content("console.log(1);", ".js").unwrap();
        assert!(file.path_str().ends_with(".js"));
        assert_eq!(file.read().unwrap(), "console.log(1);");
    }

    #[test]
    fn test_scratch_file_removed_on_drop() {
        let path = {
            let file = ScratchFile::with_content("x", ".json").unwrap();
            file.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
