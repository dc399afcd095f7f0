use keel_core::constants::DOCKERFILE_NAME;
use keel_core::{KeelError, Result};
use log::{debug, info, trace};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

enum ContextDir {
    Temporary(TempDir),
    Kept(PathBuf),
}

/// A fresh directory holding exactly what the image build may read.
///
/// Temporary contexts are removed when dropped.
pub struct BuildContext {
    dir: ContextDir,
}

impl BuildContext {
    pub fn temporary() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("keel-context-").tempdir()?;
        debug!("Staging build context in {}", dir.path().display());
        Ok(Self {
            dir: ContextDir::Temporary(dir),
        })
    }

    /// Stages into `path`, which is left in place afterwards.
    pub fn at(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;
        info!("Staging build context in {}", path.display());
        Ok(Self {
            dir: ContextDir::Kept(path.to_path_buf()),
        })
    }

    pub fn path(&self) -> &Path {
        match &self.dir {
            ContextDir::Temporary(dir) => dir.path(),
            ContextDir::Kept(path) => path,
        }
    }

    /// Copies `project_dir/source` to the same relative location in the context.
    pub fn stage(&self, project_dir: &Path, source: &Path, directory: bool) -> Result<PathBuf> {
        let fail = |reason: &str| KeelError::MaterializationFailed {
            source_path: source.to_path_buf(),
            reason: reason.to_string(),
        };

        if source.as_os_str().is_empty()
            || source
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(fail("source must be a relative path inside the project"));
        }

        let from = project_dir.join(source);
        if !from.exists() {
            return Err(fail("No such file or directory"));
        }
        if directory && !from.is_dir() {
            return Err(fail("not a directory"));
        }
        if !directory && !from.is_file() {
            return Err(fail("not a regular file"));
        }

        let to = self.path().join(source);
        if directory {
            copy_tree(&from, &to).map_err(|e| fail(&e.to_string()))?;
        } else {
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(|e| fail(&e.to_string()))?;
            }
            fs::copy(&from, &to).map_err(|e| fail(&e.to_string()))?;
        }
        trace!("Staged {} -> {}", from.display(), to.display());
        Ok(to)
    }

    pub fn write_dockerfile(&self, contents: &str) -> Result<PathBuf> {
        let path = self.path().join(DOCKERFILE_NAME);
        fs::write(&path, contents)?;
        Ok(path)
    }
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(from).follow_links(true) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(std::io::Error::other)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::ErrorKind;

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("requirements.txt"), "pandas==2.1.4\n").unwrap();
        fs::create_dir_all(dir.path().join("dags/common")).unwrap();
        fs::write(dir.path().join("dags/etl.py"), "# dag\n").unwrap();
        fs::write(dir.path().join("dags/common/util.py"), "# util\n").unwrap();
        dir
    }

    #[test]
    fn test_stage_file_and_tree() {
        let project = project();
        let context = BuildContext::temporary().unwrap();

        context
            .stage(project.path(), Path::new("requirements.txt"), false)
            .unwrap();
        context.stage(project.path(), Path::new("dags"), true).unwrap();

        assert_eq!(
            fs::read_to_string(context.path().join("requirements.txt")).unwrap(),
            "pandas==2.1.4\n"
        );
        assert!(context.path().join("dags/etl.py").is_file());
        assert!(context.path().join("dags/common/util.py").is_file());
    }

    #[test]
    fn test_missing_source_fails() {
        let project = TempDir::new().unwrap();
        let context = BuildContext::temporary().unwrap();

        let err = context
            .stage(project.path(), Path::new("requirements.txt"), false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Materialization);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_kind_mismatch_fails() {
        let project = project();
        let context = BuildContext::temporary().unwrap();
        assert!(context
            .stage(project.path(), Path::new("requirements.txt"), true)
            .is_err());
        assert!(context.stage(project.path(), Path::new("dags"), false).is_err());
    }

    #[test]
    fn test_escaping_sources_rejected() {
        let project = project();
        let context = BuildContext::temporary().unwrap();
        assert!(context
            .stage(project.path(), Path::new("../requirements.txt"), false)
            .is_err());
        assert!(context
            .stage(project.path(), Path::new("/etc/passwd"), false)
            .is_err());
    }

    #[test]
    fn test_temporary_context_is_removed() {
        let context = BuildContext::temporary().unwrap();
        let path = context.path().to_path_buf();
        context.write_dockerfile("FROM scratch\n").unwrap();
        assert!(path.join("Dockerfile").is_file());
        drop(context);
        assert!(!path.exists());
    }

    #[test]
    fn test_kept_context_survives() {
        let parent = TempDir::new().unwrap();
        let path = parent.path().join("ctx");
        {
            let context = BuildContext::at(&path).unwrap();
            context.write_dockerfile("FROM scratch\n").unwrap();
        }
        assert!(path.join("Dockerfile").is_file());
    }
}
