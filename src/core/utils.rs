//! Content hashing helpers
//!
//! Songs and artwork are addressed by the lowercase hex MD5 of their bytes.

use crate::core::error::{CadenceError, ErrorContext, Result};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Hex MD5 of an in-memory buffer
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Hex MD5 of a whole file, read in fixed-size chunks
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }

    Ok(format!("{:x}", context.compute()))
}

/// [`hash_file`] on the blocking pool
pub async fn hash_file_async(path: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .context("Hash task panicked")?
        .map_err(CadenceError::IoError)
}
