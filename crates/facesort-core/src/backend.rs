//! Face detection/embedding capability.
//!
//! The pipeline never detects faces itself. It is handed a `FaceBackend`
//! value at construction time and calls it once per image to recognize.

use crate::types::FaceDetection;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend program not found: {0}")]
    ProgramNotFound(String),
    #[error("detection failed: {0}")]
    DetectionFailed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed backend output: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Detects faces in an image and returns one embedding per face.
pub trait FaceBackend: Send + Sync {
    /// Stable identifier of the model/backend. Part of the params fingerprint,
    /// so switching backends invalidates cached outcomes.
    fn id(&self) -> String;

    fn detect_and_encode(&self, image: &Path) -> Result<Vec<FaceDetection>, BackendError>;
}

/// Backend that runs an external detector program.
///
/// The program is invoked as `<program> <args...> <image>` and must print a
/// JSON array of `{"bbox": {...}, "embedding": [...]}` objects on stdout.
/// A non-zero exit status is a detection failure for that image.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandBackend {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl FaceBackend for CommandBackend {
    fn id(&self) -> String {
        let mut id = format!("command:{}", self.program.display());
        for arg in &self.args {
            id.push(' ');
            id.push_str(arg);
        }
        id
    }

    fn detect_and_encode(&self, image: &Path) -> Result<Vec<FaceDetection>, BackendError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    BackendError::ProgramNotFound(self.program.display().to_string())
                }
                _ => BackendError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::DetectionFailed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        let faces: Vec<FaceDetection> = serde_json::from_slice(&output.stdout)?;
        tracing::trace!(image = %image.display(), faces = faces.len(), "backend detections");
        Ok(faces)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> CommandBackend {
        // `sh -c <script> sh <image>`: the image path arrives as $1.
        CommandBackend::new("sh", vec!["-c".into(), script.into(), "sh".into()])
    }

    #[test]
    fn test_command_backend_parses_detections() {
        let backend = shell(
            r#"printf '[{"bbox":{"x":1,"y":2,"width":40,"height":40},"embedding":[0.1,0.2]}]'"#,
        );
        let faces = backend.detect_and_encode(Path::new("/tmp/a.jpg")).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bbox.width, 40.0);
        assert_eq!(faces[0].bbox.confidence, 1.0);
        assert_eq!(faces[0].embedding.values, vec![0.1, 0.2]);
    }

    #[test]
    fn test_command_backend_receives_image_path() {
        let backend = shell(r#"case "$1" in */needle.jpg) printf '[]';; *) exit 3;; esac"#);
        assert!(backend.detect_and_encode(Path::new("/x/needle.jpg")).unwrap().is_empty());
        assert!(matches!(
            backend.detect_and_encode(Path::new("/x/other.jpg")),
            Err(BackendError::DetectionFailed(_))
        ));
    }

    #[test]
    fn test_command_backend_malformed_output() {
        let backend = shell("printf 'not json'");
        assert!(matches!(
            backend.detect_and_encode(Path::new("/tmp/a.jpg")),
            Err(BackendError::Malformed(_))
        ));
    }

    #[test]
    fn test_command_backend_missing_program() {
        let backend = CommandBackend::new("/nonexistent/facesort-detector", vec![]);
        assert!(matches!(
            backend.detect_and_encode(Path::new("/tmp/a.jpg")),
            Err(BackendError::ProgramNotFound(_))
        ));
    }

    #[test]
    fn test_id_includes_args() {
        let backend = CommandBackend::new("/opt/detect", vec!["--model".into(), "hog".into()]);
        assert_eq!(backend.id(), "command:/opt/detect --model hog");
    }
}
