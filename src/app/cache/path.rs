//! Cache file naming
//!
//! Every channel subdirectory gets a short stable base name derived from its
//! URL. The data, state, lock and log files all share that base.

use std::path::{Path, PathBuf};

use crate::constants::{files, repodata, state};

/// Base name for the cache entry of `url`
///
/// First 8 hex characters of the MD5 of the channel URL (with a trailing
/// `/`). Non-default document names are mixed into the hash so that
/// `current_repodata.json` does not collide with `repodata.json`.
pub fn cache_fn_url(url: &str, repodata_fn: &str) -> String {
    let mut key = url.to_string();
    if !key.ends_with('/') {
        key.push('/');
    }
    if repodata_fn != repodata::REPODATA_FN {
        key.push_str(repodata_fn);
    }
    let digest = format!("{:x}", md5::compute(key.as_bytes()));
    digest[..8].to_string()
}

/// Paths of the files making up one cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    base: PathBuf,
}

impl CachePaths {
    /// Paths sharing `base`, which has no extension of its own
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Paths for `url` under `cache_dir`
    pub fn for_url(cache_dir: &Path, url: &str, repodata_fn: &str) -> Self {
        Self::new(cache_dir.join(cache_fn_url(url, repodata_fn)))
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name = self.base.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn json_path(&self) -> PathBuf {
        self.with_suffix(state::JSON_SUFFIX)
    }

    pub fn state_path(&self) -> PathBuf {
        self.with_suffix(state::STATE_SUFFIX)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.with_suffix(state::LOCK_SUFFIX)
    }

    pub fn jlap_path(&self) -> PathBuf {
        self.with_suffix(state::JLAP_SUFFIX)
    }

    /// Fresh temp file beside the entry: `<base>.<4 hex>.tmp`
    pub fn temp_path(&self) -> PathBuf {
        self.with_suffix(&format!(".{:04x}{}", fastrand::u16(..), files::TEMP_FILE_SUFFIX))
    }

    pub fn cache_dir(&self) -> &Path {
        self.base.parent().unwrap_or_else(|| Path::new("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_fn_url_is_stable() {
        let a = cache_fn_url("https://conda.anaconda.org/conda-forge/linux-64", "repodata.json");
        let b = cache_fn_url("https://conda.anaconda.org/conda-forge/linux-64/", "repodata.json");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_cache_fn_url_distinguishes_documents() {
        let url = "https://conda.anaconda.org/conda-forge/noarch";
        assert_ne!(
            cache_fn_url(url, "repodata.json"),
            cache_fn_url(url, "current_repodata.json")
        );
        assert_ne!(
            cache_fn_url(url, "repodata.json"),
            cache_fn_url("https://conda.anaconda.org/conda-forge/linux-64", "repodata.json")
        );
    }

    #[test]
    fn test_entry_paths() {
        let paths = CachePaths::new("/cache/abcd1234");
        assert_eq!(paths.json_path(), PathBuf::from("/cache/abcd1234.json"));
        assert_eq!(paths.state_path(), PathBuf::from("/cache/abcd1234.state.json"));
        assert_eq!(paths.lock_path(), PathBuf::from("/cache/abcd1234.lock"));
        assert_eq!(paths.jlap_path(), PathBuf::from("/cache/abcd1234.jlap"));
        assert_eq!(paths.cache_dir(), Path::new("/cache"));

        let temp = paths.temp_path();
        let name = temp.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("abcd1234."));
        assert!(name.ends_with(".tmp"));
        assert_eq!(name.len(), "abcd1234.0000.tmp".len());
        assert_eq!(temp.parent(), Some(Path::new("/cache")));
    }
}
