//! liveframe-models: model manifest and integrity checks.
//!
//! The daemon refuses to start on a model file whose SHA-256 digest differs
//! from the manifest; the CLI reports per-file status.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One entry of the model manifest.
pub struct ModelFile {
    pub name: &'static str,
    pub url: &'static str,
    pub sha256: &'static str,
    pub size_display: &'static str,
}

// Digests taken from the Git LFS pointers of the InsightFace buffalo_l pack.
pub const DETECTOR: ModelFile = ModelFile {
    name: "det_10g.onnx",
    url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/det_10g.onnx",
    sha256: "5838f7fe053675b1c7a08b633df49e7af5495cee0493c7dcf6697200b85b5b91",
    size_display: "16 MB",
};

pub const RECOGNIZER: ModelFile = ModelFile {
    name: "w600k_r50.onnx",
    url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/w600k_r50.onnx",
    sha256: "4c06341c33c2ca1f86781dab0e829f88ad5b64be9fba56e56bc9ebdefc619e43",
    size_display: "166 MB",
};

pub const MODELS: &[ModelFile] = &[DETECTOR, RECOGNIZER];

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {name} ({path})")]
    Missing { name: &'static str, path: PathBuf },

    #[error("failed to read model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum mismatch for {name} ({path}): expected {expected}, got {got}")]
    ChecksumMismatch {
        name: &'static str,
        path: PathBuf,
        expected: String,
        got: String,
    },
}

/// Directory searched for model files when none is configured.
///
/// `$LIVEFRAME_MODEL_DIR`, else `$XDG_DATA_HOME/liveframe/models`, else
/// `~/.local/share/liveframe/models`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("LIVEFRAME_MODEL_DIR") {
        return PathBuf::from(dir);
    }
    let data_home = std::env::var("XDG_DATA_HOME").map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".local/share")
    });
    data_home.join("liveframe/models")
}

/// Hex SHA-256 of a file, streamed in 8 KiB chunks.
pub fn sha256_file_hex(path: &Path) -> Result<String, ModelError> {
    let io_error = |source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::open(path).map_err(io_error)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(io_error)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn verify_file_sha256(
    name: &'static str,
    path: &Path,
    expected_sha256: &str,
) -> Result<(), ModelError> {
    if !path.exists() {
        return Err(ModelError::Missing {
            name,
            path: path.to_path_buf(),
        });
    }
    let got = sha256_file_hex(path)?;
    if !got.eq_ignore_ascii_case(expected_sha256) {
        return Err(ModelError::ChecksumMismatch {
            name,
            path: path.to_path_buf(),
            expected: expected_sha256.to_string(),
            got,
        });
    }
    Ok(())
}

/// Fail on the first manifest entry that is missing or tampered with.
pub fn verify_models_dir(model_dir: &Path) -> Result<(), ModelError> {
    MODELS
        .iter()
        .try_for_each(|m| verify_file_sha256(m.name, &model_dir.join(m.name), m.sha256))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    Ok,
    Missing,
    ChecksumMismatch { got: String },
    Unreadable(String),
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelStatus::Ok => f.write_str("ok"),
            ModelStatus::Missing => f.write_str("missing"),
            ModelStatus::ChecksumMismatch { got } => write!(f, "checksum mismatch (got {got})"),
            ModelStatus::Unreadable(e) => write!(f, "unreadable: {e}"),
        }
    }
}

pub struct ModelCheck {
    pub model: &'static ModelFile,
    pub path: PathBuf,
    pub status: ModelStatus,
}

/// Check every manifest entry without stopping at the first problem.
pub fn inspect_models_dir(model_dir: &Path) -> Vec<ModelCheck> {
    MODELS
        .iter()
        .map(|model| {
            let path = model_dir.join(model.name);
            let status = match verify_file_sha256(model.name, &path, model.sha256) {
                Ok(()) => ModelStatus::Ok,
                Err(ModelError::Missing { .. }) => ModelStatus::Missing,
                Err(ModelError::ChecksumMismatch { got, .. }) => {
                    ModelStatus::ChecksumMismatch { got }
                }
                Err(e @ ModelError::Io { .. }) => ModelStatus::Unreadable(e.to_string()),
            };
            ModelCheck {
                model,
                path,
                status,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "liveframe-models-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    #[test]
    fn sha256_of_known_content() {
        let dir = scratch_dir("digest");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("hello.bin");
        fs::write(&path, b"hello").unwrap();

        assert_eq!(
            sha256_file_hex(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_rejects_missing() {
        let path = scratch_dir("missing").join("nope.onnx");
        let err = verify_file_sha256("nope.onnx", &path, "00").unwrap_err();
        assert!(matches!(err, ModelError::Missing { .. }));
    }

    #[test]
    fn verify_rejects_mismatch_and_accepts_match() {
        let dir = scratch_dir("match");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.onnx");
        fs::write(&path, b"weights").unwrap();

        let err = verify_file_sha256("model.onnx", &path, "00").unwrap_err();
        assert!(matches!(err, ModelError::ChecksumMismatch { .. }));

        let digest = sha256_file_hex(&path).unwrap();
        verify_file_sha256("model.onnx", &path, &digest.to_uppercase()).unwrap();
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn inspect_reports_every_model() {
        let dir = scratch_dir("inspect");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(DETECTOR.name), b"not the real detector").unwrap();

        let checks = inspect_models_dir(&dir);
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].model.name, DETECTOR.name);
        assert!(matches!(checks[0].status, ModelStatus::ChecksumMismatch { .. }));
        assert_eq!(checks[1].status, ModelStatus::Missing);
        assert!(matches!(
            verify_models_dir(&dir),
            Err(ModelError::ChecksumMismatch { name: "det_10g.onnx", .. })
        ));
        let _ = fs::remove_dir_all(&dir);
    }
}
