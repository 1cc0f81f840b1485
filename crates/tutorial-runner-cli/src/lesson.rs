//! Lessons laid out on disk.
//!
//! A lesson directory holds `lesson.yaml` (or `lesson.json`), the lesson files
//! under `_files/` and an optional solution under `_solution/`. Templates are
//! sibling directories of a templates root, selected by name.

use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::debug;
use tutorial_runner::files::content_from_bytes;
use tutorial_runner::model::{Files, Lesson};
use tutorial_runner::{LessonLoader, RunnerError, RunnerResult};

const LESSON_FILES: &str = "_files";
const SOLUTION_FILES: &str = "_solution";

/// Parse the lesson descriptor in `dir`.
pub fn load_lesson(dir: &Path) -> RunnerResult<Lesson> {
    let yaml = dir.join("lesson.yaml");
    if yaml.is_file() {
        let text = read_descriptor(&yaml)?;
        return serde_yml::from_str(&text).map_err(|err| invalid_lesson(&yaml, &err));
    }
    let json = dir.join("lesson.json");
    let text = read_descriptor(&json)?;
    serde_json::from_str(&text).map_err(|err| invalid_lesson(&json, &err))
}

fn invalid_lesson(path: &Path, err: &dyn std::fmt::Display) -> RunnerError {
    RunnerError::invalid_schema(
        format!("invalid lesson {}", path.display()),
        json!({ "source": err.to_string() }),
    )
}

fn read_descriptor(path: &Path) -> RunnerResult<String> {
    std::fs::read_to_string(path)
        .map_err(|err| RunnerError::io(format!("failed to read {}", path.display()), err))
}

/// Serves one lesson directory and an optional templates root.
pub struct DirLoader {
    lesson_dir: PathBuf,
    templates: Option<PathBuf>,
}

impl DirLoader {
    pub fn new(lesson_dir: PathBuf, templates: Option<PathBuf>) -> Self {
        Self {
            lesson_dir,
            templates,
        }
    }
}

#[async_trait]
impl LessonLoader for DirLoader {
    async fn template(&self, name: &str) -> RunnerResult<Files> {
        let Some(root) = &self.templates else {
            return Err(RunnerError::io(
                format!("lesson uses template '{name}'"),
                "no templates directory given",
            ));
        };
        if name.contains(['/', '\\']) || name == ".." {
            return Err(RunnerError::invalid_schema(
                "invalid template name",
                json!({ "template": name }),
            ));
        }
        read_tree(root.join(name), true).await
    }

    async fn files(&self, _lesson: &Lesson) -> RunnerResult<Files> {
        read_tree(self.lesson_dir.join(LESSON_FILES), false).await
    }

    async fn solution(&self, _lesson: &Lesson) -> RunnerResult<Files> {
        read_tree(self.lesson_dir.join(SOLUTION_FILES), false).await
    }
}

/// Read every file under `dir`. A missing directory is an empty set unless
/// `required`.
async fn read_tree(dir: PathBuf, required: bool) -> RunnerResult<Files> {
    tokio::task::spawn_blocking(move || {
        if !dir.is_dir() {
            if required {
                return Err(RunnerError::io(
                    format!("failed to read {}", dir.display()),
                    "not a directory",
                ));
            }
            return Ok(Files::new());
        }
        let mut files = Files::new();
        collect(&dir, "", &mut files)?;
        debug!(dir = %dir.display(), count = files.len(), "read lesson tree");
        Ok(files)
    })
    .await
    .map_err(|err| RunnerError::internal(format!("file reader panicked: {err}")))?
}

fn collect(dir: &Path, prefix: &str, files: &mut Files) -> RunnerResult<()> {
    let entries = std::fs::read_dir(dir)
        .map_err(|err| RunnerError::io(format!("failed to list {}", dir.display()), err))?;
    for entry in entries {
        let entry =
            entry.map_err(|err| RunnerError::io(format!("failed to list {}", dir.display()), err))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = format!("{prefix}/{name}");
        let path = entry.path();
        if path.is_dir() {
            collect(&path, &key, files)?;
        } else {
            let bytes = std::fs::read(&path)
                .map_err(|err| RunnerError::io(format!("failed to read {}", path.display()), err))?;
            files.insert(key, content_from_bytes(bytes));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tutorial_runner::model::FileContent;

    fn write(root: &Path, relative: &str, content: &[u8]) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn yaml_descriptor_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lesson.yaml", b"id: from-yaml\ndata:\n  mainCommand: npm start\n");
        write(dir.path(), "lesson.json", br#"{"id":"from-json","data":{}}"#);

        let lesson = load_lesson(dir.path()).unwrap();

        assert_eq!(lesson.id, "from-yaml");
    }

    #[test]
    fn missing_descriptor_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_lesson(dir.path()).unwrap_err();
        assert_eq!(err.code, tutorial_runner::ErrorCode::Io);
    }

    #[tokio::test]
    async fn trees_are_keyed_by_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "_files/src/index.js", b"console.log(1)");
        write(dir.path(), "_files/logo.png", &[0x89, 0x50, 0xff, 0xfe]);
        let lesson: Lesson = serde_json::from_str(r#"{"id":"l","data":{}}"#).unwrap();
        let loader = DirLoader::new(dir.path().to_path_buf(), None);

        let files = loader.files(&lesson).await.unwrap();

        assert_eq!(files.get("/src/index.js"), Some(&FileContent::from("console.log(1)")));
        assert!(files.get("/logo.png").unwrap().is_binary());
        assert!(loader.solution(&lesson).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn template_requires_templates_root() {
        let dir = tempfile::tempdir().unwrap();
        let loader = DirLoader::new(dir.path().to_path_buf(), None);
        assert!(loader.template("vite").await.is_err());

        write(dir.path(), "templates/vite/package.json", b"{}");
        let loader = DirLoader::new(dir.path().to_path_buf(), Some(dir.path().join("templates")));
        let template = loader.template("vite").await.unwrap();
        assert_eq!(template.keys().collect::<Vec<_>>(), vec!["/package.json"]);
        assert!(loader.template("../vite").await.is_err());
    }
}
