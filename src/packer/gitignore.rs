use crate::utils::error::CodecrateError;
use ignore::gitignore::GitignoreBuilder;
use std::path::Path;

/// Paths that are never packed, whatever the include patterns say.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "__pycache__/",
    "*.pyc",
    ".git/",
    ".venv/",
    "venv/",
    ".tox/",
    ".pytest_cache/",
    "build/",
    "dist/",
    "_version.py",
];

/// Gitignore-style matcher for the built-in exclusions.
pub struct DefaultIgnores {
    gitignore: ignore::gitignore::Gitignore,
}

impl DefaultIgnores {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, CodecrateError> {
        let mut builder = GitignoreBuilder::new(root);
        for line in DEFAULT_EXCLUDES {
            builder
                .add_line(None, line)
                .map_err(|e: ignore::Error| CodecrateError::Config(e.to_string()))?;
        }
        let gitignore = builder
            .build()
            .map_err(|e: ignore::Error| CodecrateError::Config(e.to_string()))?;
        Ok(Self { gitignore })
    }

    pub fn is_ignored<P: AsRef<Path>>(&self, path: P, is_dir: bool) -> bool {
        self.gitignore
            .matched_path_or_any_parents(path, is_dir)
            .is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ignores() {
        let ignores = DefaultIgnores::new("/repo").unwrap();
        assert!(ignores.is_ignored("/repo/pkg/__pycache__/a.cpython-312.pyc", false));
        assert!(ignores.is_ignored("/repo/.git/config", false));
        assert!(ignores.is_ignored("/repo/src/pkg/_version.py", false));
        assert!(!ignores.is_ignored("/repo/src/pkg/core.py", false));
    }
}
