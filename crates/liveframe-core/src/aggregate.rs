use crate::types::{check_uniform_dim, Embedding, EmbeddingError};

/// Mean-pool a burst of embeddings into one representative vector.
///
/// Sums are accumulated in `f64`, which keeps the result independent of the
/// order of the batch for realistic embedding magnitudes and makes a single
/// embedding pool back to itself exactly. The model version is kept when
/// every input agrees on it.
pub fn mean_pool(embeddings: &[Embedding]) -> Result<Embedding, EmbeddingError> {
    let dim = check_uniform_dim(embeddings)?;

    let mut sums = vec![0.0f64; dim];
    for embedding in embeddings {
        for (sum, v) in sums.iter_mut().zip(&embedding.values) {
            *sum += f64::from(*v);
        }
    }

    let n = embeddings.len() as f64;
    let values = sums.into_iter().map(|s| (s / n) as f32).collect();

    let model_version = embeddings[0].model_version.clone().filter(|first| {
        embeddings
            .iter()
            .all(|e| e.model_version.as_deref() == Some(first.as_str()))
    });

    Ok(Embedding {
        values,
        model_version,
    })
}
