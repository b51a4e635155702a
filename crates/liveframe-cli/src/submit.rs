//! `liveframe submit`: post a burst of frames to a running daemon.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

pub fn batch_url(base: &str) -> String {
    format!("{}/extract_vector_batch", base.trim_end_matches('/'))
}

pub fn run(files: &[PathBuf], url: &str) -> Result<()> {
    let frames = crate::frames::encode_files(files)?;
    let endpoint = batch_url(url);

    // Error statuses still carry a result record worth printing.
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(Duration::from_secs(30)))
        .build()
        .into();

    let mut resp = agent
        .post(&endpoint)
        .send_json(serde_json::json!({ "images": frames }))
        .with_context(|| format!("failed to reach {endpoint}"))?;

    let status = resp.status();
    let body: serde_json::Value = resp
        .body_mut()
        .read_json()
        .with_context(|| format!("invalid response from {endpoint} (HTTP {status})"))?;

    if !status.is_success() {
        eprintln!("HTTP {status}");
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_url() {
        assert_eq!(
            batch_url("http://127.0.0.1:8000"),
            "http://127.0.0.1:8000/extract_vector_batch"
        );
        assert_eq!(
            batch_url("http://scorer:9000/"),
            "http://scorer:9000/extract_vector_batch"
        );
    }
}
