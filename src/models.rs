use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub url: String,
    pub save_dir: String,
    pub filename: String,
}

impl DownloadTarget {
    pub fn new(
        url: impl Into<String>,
        save_dir: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            save_dir: save_dir.into(),
            filename: filename.into(),
        }
    }

    /// Local path the body is written to.
    pub fn target_path(&self) -> PathBuf {
        PathBuf::from(&self.save_dir).join(&self.filename)
    }
}

/// Reported to a progress sink after every chunk written.
///
/// `total` is the declared content length, `None` when the server omitted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub written: u64,
    pub total: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn target_path_joins_dir_and_filename() {
        let target = DownloadTarget::new("https://example.com/a.mp4", "/tmp/videos", "a.mp4");
        assert_eq!(target.target_path(), Path::new("/tmp/videos/a.mp4"));
    }
}
