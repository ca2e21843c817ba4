//! Grammar loading from the filesystem

use std::path::{Path, PathBuf};

use super::descriptor::GrammarDescriptor;
use super::error::GrammarError;
use super::types::GrammarRegistry;

/// Source of grammar descriptors
pub trait GrammarLoader: Send {
    /// Every descriptor this loader provides
    fn load(&self) -> Result<Vec<GrammarDescriptor>, GrammarError>;
}

/// Loads every `*.json` file of a directory as a grammar descriptor
#[derive(Debug, Clone)]
pub struct LocalGrammarLoader {
    dir: PathBuf,
}

impl LocalGrammarLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl GrammarLoader for LocalGrammarLoader {
    fn load(&self) -> Result<Vec<GrammarDescriptor>, GrammarError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        // Directory order is unspecified; later files win name and extension conflicts
        paths.sort();

        let mut descriptors = Vec::with_capacity(paths.len());
        for path in paths {
            tracing::debug!("loading grammar {}", path.display());
            let contents = std::fs::read_to_string(&path)?;
            descriptors.push(GrammarDescriptor::from_json(&contents)?);
        }
        Ok(descriptors)
    }
}

impl GrammarRegistry {
    /// Register everything `loader` provides on top of this snapshot
    pub fn load(&self, loader: &dyn GrammarLoader) -> Result<Self, GrammarError> {
        self.register(loader.load()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_loader_reads_json_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"scopeName": "source.a", "extensions": [".a"], "patterns": []}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a grammar").unwrap();

        let loader = LocalGrammarLoader::new(dir.path());
        let descriptors = loader.load().unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].scope_name, "source.a");

        let registry = GrammarRegistry::default().load(&loader).unwrap();
        assert_eq!(registry.resolve_flag("x.a"), Some("source.a"));
    }

    #[test]
    fn test_local_loader_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        let err = LocalGrammarLoader::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, GrammarError::Json(_)));
    }

    #[test]
    fn test_local_loader_missing_dir() {
        let err = LocalGrammarLoader::new("/nonexistent/grammars")
            .load()
            .unwrap_err();
        assert!(matches!(err, GrammarError::Io(_)));
    }
}
