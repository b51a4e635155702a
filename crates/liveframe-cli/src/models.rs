//! `liveframe models`: report and optionally download the ONNX models.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use liveframe_models::{inspect_models_dir, ModelFile, ModelStatus};
use sha2::{Digest, Sha256};

pub fn run(dir: &Path, fetch: bool) -> Result<()> {
    println!("Model directory: {}", dir.display());

    let checks = inspect_models_dir(dir);
    for check in &checks {
        println!(
            "  {:<16} {:>7}  {}",
            check.model.name, check.model.size_display, check.status
        );
    }

    let pending: Vec<_> = checks
        .iter()
        .filter(|c| c.status != ModelStatus::Ok)
        .collect();
    if pending.is_empty() {
        println!("All models present.");
        return Ok(());
    }
    if !fetch {
        bail!(
            "{} model(s) not ready; rerun with --fetch to download",
            pending.len()
        );
    }

    tracing::info!(count = pending.len(), "fetching models");
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;
    for check in &pending {
        download_model(check.model, &check.path)?;
    }
    println!("Downloaded {} model(s).", pending.len());
    Ok(())
}

fn download_model(model: &ModelFile, dest: &Path) -> Result<()> {
    println!("  downloading {} ({})...", model.name, model.size_display);
    tracing::info!(url = model.url, dest = %dest.display(), "fetching model");

    let resp = ureq::get(model.url)
        .call()
        .with_context(|| format!("failed to download {}", model.url))?;
    let total = resp
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let part = PartFile::create(dest.with_extension("onnx.part"))?;
    let mut sink = HashingWriter::new(&part.file, total);
    io::copy(&mut resp.into_body().into_reader(), &mut sink)
        .with_context(|| format!("download of {} interrupted", model.name))?;
    sink.flush()?;

    let digest = sink.hex_digest();
    tracing::debug!(bytes = sink.written, digest = %digest, "download finished");
    if !digest.eq_ignore_ascii_case(model.sha256) {
        bail!(
            "checksum mismatch for {}: expected {}, got {digest}",
            model.name,
            model.sha256
        );
    }
    println!("  {} verified", model.name);
    part.persist(dest)
}

/// A `.part` file that is removed unless [`PartFile::persist`] succeeds.
struct PartFile {
    path: PathBuf,
    file: fs::File,
    keep: bool,
}

impl PartFile {
    fn create(path: PathBuf) -> Result<Self> {
        let file = fs::File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            path,
            file,
            keep: false,
        })
    }

    fn persist(mut self, dest: &Path) -> Result<()> {
        self.file.sync_all()?;
        fs::rename(&self.path, dest).with_context(|| {
            format!("failed to move {} into place", self.path.display())
        })?;
        self.keep = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.keep {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to remove partial download"
                );
            }
        }
    }
}

/// Writes through to a file while hashing and reporting progress in tenths.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
    total: Option<u64>,
    tenths: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W, total: Option<u64>) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
            total: total.filter(|&t| t > 0),
            tenths: 0,
        }
    }

    fn hex_digest(&self) -> String {
        format!("{:x}", self.hasher.clone().finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        if let Some(total) = self.total {
            let tenths = (self.written * 10 / total).min(10);
            if tenths > self.tenths {
                self.tenths = tenths;
                print!("  {}%\r", tenths * 10);
                io::stdout().flush().ok();
            }
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
