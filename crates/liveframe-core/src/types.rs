use thiserror::Error;

/// A face embedding produced by the recognition model for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Identifier of the model that produced the vector, when known.
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) distance to another embedding of the same length.
    pub fn euclidean_distance(&self, other: &Embedding) -> Result<f32, EmbeddingError> {
        if self.dim() != other.dim() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dim(),
                got: other.dim(),
            });
        }
        let sum: f32 = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        Ok(sum.sqrt())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("no embeddings to combine")]
    Empty,
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Check that every embedding in the batch has the length of the first one.
pub fn check_uniform_dim(embeddings: &[Embedding]) -> Result<usize, EmbeddingError> {
    let first = embeddings.first().ok_or(EmbeddingError::Empty)?;
    let expected = first.dim();
    match embeddings.iter().find(|e| e.dim() != expected) {
        Some(bad) => Err(EmbeddingError::DimensionMismatch {
            expected,
            got: bad.dim(),
        }),
        None => Ok(expected),
    }
}
