use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::NamedTempFile;

use crate::batch::{Batch, BatchBody};
use crate::error::ShipError;

const TEMP_PREFIX: &str = "tdship-";

// ---- Config ----

/// How batches are gzip-compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStrategy {
    /// In-process gzip encoder.
    #[default]
    Stream,
    /// External `gzip` process, falling back to `Stream` when it fails.
    External,
}

// ---- Artifact ----

/// Gzip payload in a temporary file. The file is deleted when the artifact
/// is dropped.
#[derive(Debug)]
pub struct CompressedArtifact {
    file: NamedTempFile,
    size: u64,
}

impl CompressedArtifact {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Fresh handle positioned at offset 0.
    pub fn open(&self) -> io::Result<File> {
        self.file.reopen()
    }
}

// ---- Compressor ----

#[derive(Debug, Clone)]
enum Strategy {
    Stream,
    External { program: PathBuf },
}

/// Turns a batch into a gzip artifact under `tmpdir`.
#[derive(Debug, Clone)]
pub struct Compressor {
    strategy: Strategy,
    tmpdir: PathBuf,
}

impl Compressor {
    pub fn stream(tmpdir: impl Into<PathBuf>) -> Self {
        Self {
            strategy: Strategy::Stream,
            tmpdir: tmpdir.into(),
        }
    }

    /// External compression through `command`. Fails when the command cannot
    /// be found, so a missing utility surfaces at configuration time.
    pub fn external(command: &str, tmpdir: impl Into<PathBuf>) -> Result<Self, ShipError> {
        let program = find_executable(command).ok_or_else(|| {
            ShipError::Config(format!(
                "compression = \"external\" requires '{command}', which was not found in PATH; \
                 install it or use compression = \"stream\""
            ))
        })?;
        Ok(Self {
            strategy: Strategy::External { program },
            tmpdir: tmpdir.into(),
        })
    }

    pub fn from_strategy(
        strategy: CompressionStrategy,
        command: &str,
        tmpdir: impl Into<PathBuf>,
    ) -> Result<Self, ShipError> {
        match strategy {
            CompressionStrategy::Stream => Ok(Self::stream(tmpdir)),
            CompressionStrategy::External => Self::external(command, tmpdir),
        }
    }

    /// Re-check that the external utility is still available.
    pub fn validate(&self) -> Result<(), ShipError> {
        if let Strategy::External { program } = &self.strategy {
            if !is_executable(program) {
                return Err(ShipError::Config(format!(
                    "external compression utility '{}' is not available",
                    program.display()
                )));
            }
        }
        Ok(())
    }

    /// Compress `batch` into a new temporary file (blocking).
    pub fn compress(&self, batch: &Batch) -> Result<CompressedArtifact, ShipError> {
        std::fs::create_dir_all(&self.tmpdir)?;
        let mut file = self.tempfile(".gz")?;

        match &self.strategy {
            Strategy::Stream => compress_stream(batch, file.as_file_mut())?,
            Strategy::External { program } => {
                if let Err(e) = self.compress_external(program, batch, file.as_file()) {
                    tracing::warn!(
                        program = %program.display(),
                        error = %e,
                        "external compression failed, falling back to in-process gzip"
                    );
                    let f = file.as_file_mut();
                    f.set_len(0)?;
                    f.seek(SeekFrom::Start(0))?;
                    compress_stream(batch, f)?;
                }
            }
        }

        let size = file.as_file().metadata()?.len();
        Ok(CompressedArtifact { file, size })
    }

    fn tempfile(&self, suffix: &str) -> io::Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(suffix)
            .tempfile_in(&self.tmpdir)
    }

    fn compress_external(&self, program: &Path, batch: &Batch, dest: &File) -> io::Result<()> {
        // A memory batch is spilled to its own temp file; a file batch is
        // read in place.
        let spilled;
        let input = match batch.body() {
            BatchBody::File(path) => path.as_path(),
            BatchBody::Memory(buf) => {
                let mut tmp = self.tempfile(".msgpack")?;
                tmp.write_all(buf)?;
                tmp.flush()?;
                spilled = tmp;
                spilled.path()
            }
        };

        let output = Command::new(program)
            .arg("-n")
            .arg("-c")
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::from(dest.try_clone()?))
            .stderr(Stdio::piped())
            .output()?;

        if output.status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

fn compress_stream(batch: &Batch, dest: &mut File) -> io::Result<()> {
    let mut reader = batch.reader()?;
    let mut encoder = GzEncoder::new(dest, Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()
}

/// Gzip of an empty stream, the payload of existence probes.
pub fn empty_gzip() -> Vec<u8> {
    // Writing into a Vec cannot fail.
    GzEncoder::new(Vec::new(), Compression::default())
        .finish()
        .unwrap_or_default()
}

/// Resolve `command` the way a shell would: a path is checked directly,
/// a bare name is looked up in `PATH`.
pub fn find_executable(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(command))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
