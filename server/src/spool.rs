//! On-disk buffering of a message while it is received and scanned

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Failing to buffer a message is always transient for the client
#[derive(Debug, Error)]
pub enum SpoolError {
    /// The spool file could not be created
    #[error("could not create spool file in {dir}")]
    Create {
        /// The configured spool directory
        dir: PathBuf,
        /// Why
        #[source]
        source: io::Error,
    },
    /// Writing or flushing failed
    #[error("could not write to spool file")]
    Write(#[source] io::Error),
}

/// A uniquely named temporary file owned by one session.
///
/// The file is removed when the `Spool` (or the [`TempPath`] returned by
/// [`Spool::finish`]) is dropped, whether the message completed or not.
#[derive(Debug)]
pub struct Spool {
    file: File,
    path: TempPath,
    written: u64,
}

impl Spool {
    /// Create a new spool file in `dir`
    ///
    /// # Errors
    /// If the file could not be created
    pub fn create(dir: &Path) -> Result<Self, SpoolError> {
        let file = tempfile::Builder::new()
            .prefix("mailgate-")
            .suffix(".eml")
            .tempfile_in(dir)
            .map_err(|source| SpoolError::Create {
                dir: dir.to_path_buf(),
                source,
            })?;
        let (file, path) = file.into_parts();

        Ok(Self {
            file: File::from_std(file),
            path,
            written: 0,
        })
    }

    /// Append `data`
    ///
    /// # Errors
    /// If the write failed
    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), SpoolError> {
        self.file.write_all(data).await.map_err(SpoolError::Write)?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Bytes written so far
    #[must_use]
    pub fn len(&self) -> u64 {
        self.written
    }

    /// Whether nothing was written yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Where the message is buffered
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the file, handing over ownership of the path.
    ///
    /// # Errors
    /// If flushing failed
    pub async fn finish(mut self) -> Result<TempPath, SpoolError> {
        self.file.flush().await.map_err(SpoolError::Write)?;
        self.file.sync_data().await.map_err(SpoolError::Write)?;
        Ok(self.path)
    }
}

/// The offset of the first body byte in a spooled message, i.e. the byte
/// after the empty line ending the header block.
///
/// A message without an empty line has no body, its length is returned.
///
/// # Errors
/// If the file could not be read
pub async fn body_offset(path: &Path) -> io::Result<u64> {
    let mut reader = BufReader::new(File::open(path).await?);
    let mut line = Vec::new();
    let mut offset = 0;
    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line).await?;
        if read == 0 {
            return Ok(offset);
        }
        offset += read as u64;
        if line == b"\r\n" || line == b"\n" {
            return Ok(offset);
        }
    }
}
