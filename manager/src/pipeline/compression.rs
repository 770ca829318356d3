// File: manager/src/pipeline/compression.rs
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{with_suffix, PartialOutput};
use crate::constants::layout;
use crate::errors::PipelineError;

/// Gzip `path` into `<path>.gz` and remove the original.
///
/// The output is written to a `.partial` file, synced and renamed into place
/// before the original is deleted, so a crash never leaves neither copy.
/// The gzip header carries no timestamp, so identical input gives identical
/// output.
pub async fn compress(path: &Path, level: u32) -> Result<PathBuf, PipelineError> {
    let source = path.to_path_buf();
    let started = std::time::Instant::now();

    let output = tokio::task::spawn_blocking(move || compress_blocking(&source, level))
        .await
        .map_err(|e| PipelineError::Compression {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })??;

    info!(
        "✓ Compressed {} (level {}, {:.1}s)",
        output.display(),
        level,
        started.elapsed().as_secs_f64()
    );
    Ok(output)
}

fn compress_blocking(source: &Path, level: u32) -> Result<PathBuf, PipelineError> {
    let failed = |e: io::Error| PipelineError::Compression {
        path: source.to_path_buf(),
        reason: e.to_string(),
    };

    let output = with_suffix(source, layout::GZIP_SUFFIX);
    let partial = PartialOutput::new(with_suffix(&output, layout::PARTIAL_SUFFIX));

    let mut reader = BufReader::new(File::open(source).map_err(failed)?);
    let file = File::create(partial.path()).map_err(failed)?;
    let mut encoder = GzBuilder::new()
        .mtime(0)
        .write(BufWriter::new(file), Compression::new(level.clamp(1, 9)));
    io::copy(&mut reader, &mut encoder).map_err(failed)?;
    let mut writer = encoder.finish().map_err(failed)?;
    writer.flush().map_err(failed)?;
    let file = writer.into_inner().map_err(|e| failed(e.into_error()))?;
    file.sync_all().map_err(failed)?;
    drop(file);

    fs::rename(partial.path(), &output).map_err(failed)?;
    partial.disarm();
    fs::remove_file(source).map_err(failed)?;
    Ok(output)
}

/// Stream-decompress `input` into `output`
pub async fn decompress(input: &Path, output: &Path) -> Result<u64, PipelineError> {
    let source = input.to_path_buf();
    let target = output.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<u64, PipelineError> {
        let failed = |e: io::Error| PipelineError::Decompression {
            path: source.clone(),
            reason: e.to_string(),
        };
        let mut decoder = GzDecoder::new(BufReader::new(File::open(&source).map_err(failed)?));
        let mut writer = BufWriter::new(File::create(&target).map_err(failed)?);
        let written = io::copy(&mut decoder, &mut writer).map_err(failed)?;
        writer.flush().map_err(failed)?;
        Ok(written)
    })
    .await
    .map_err(|e| PipelineError::Decompression {
        path: input.to_path_buf(),
        reason: e.to_string(),
    })?
}

/// Decompress `input` into a sink; proves the stream and its CRC are intact
pub async fn test_decompress(input: &Path) -> Result<u64, PipelineError> {
    let source = input.to_path_buf();
    let bytes = tokio::task::spawn_blocking(move || -> Result<u64, PipelineError> {
        let failed = |e: io::Error| PipelineError::Decompression {
            path: source.clone(),
            reason: e.to_string(),
        };
        let mut decoder = GzDecoder::new(BufReader::new(File::open(&source).map_err(failed)?));
        io::copy(&mut decoder, &mut io::sink()).map_err(failed)
    })
    .await
    .map_err(|e| PipelineError::Decompression {
        path: input.to_path_buf(),
        reason: e.to_string(),
    })??;
    debug!("Test decompression of {} yielded {} bytes", input.display(), bytes);
    Ok(bytes)
}
