use std::ffi::OsStr;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::OnceCell;
use rand::RngCore;
use sha1::{Digest, Sha1};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub mod path;

pub use path::{basename, clean_path, normalize_path, only_clean_path, parent_dir};

/// Guard for the non-blocking file writer so it is not dropped early.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
/// Ensures logging is only initialized once.
static LOG_INIT: OnceCell<()> = OnceCell::new();

/// Initialize tracing-based logging with both console and file output.
///
/// Subsequent calls are no-ops so every binary can call this helper
/// confidently and share the same configuration.
pub fn init_logging(log_path: &Path) -> Result<()> {
    LOG_INIT
        .get_or_try_init(|| configure_logging(log_path))
        .map(|_| ())
}

fn configure_logging(log_path: &Path) -> Result<()> {
    let log_dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let _ = fs::create_dir_all(log_dir);
    let file_name = log_path
        .file_name()
        .unwrap_or_else(|| OsStr::new("cloudsyncer.log"));

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep guard alive for the process lifetime.
    let _ = FILE_GUARD.set(guard);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer().with_writer(std::io::stdout);
    let file_layer = fmt::layer().with_ansi(false).with_writer(file_writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

/// Hex-encoded SHA-1 of an in-memory buffer. Content hashes on the wire are
/// always this form.
pub fn sha1_hex(input: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-1 of a file, streamed so large files do not load whole.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let file = fs::File::open(path)?;
    let mut reader = io::BufReader::new(file);
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Random lowercase hex string of exactly `len` characters.
pub fn rand_hex(len: usize) -> String {
    let mut buf = vec![0u8; len.div_ceil(2)];
    rand::thread_rng().fill_bytes(&mut buf);
    let mut out = hex::encode(buf);
    out.truncate(len);
    out
}

/// Generic retry helper for IO operations against `path`.
///
/// The watcher uses this to ride out the window where a file is still being
/// written (or has just been renamed away) when an event fires.
pub fn retry_io<T, F>(path: &Path, attempts: usize, delay_ms: u64, mut op: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    let mut last_err = None;
    for attempt in 1..=attempts {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => {
                last_err = Some(e);
                if attempt < attempts {
                    thread::sleep(Duration::from_millis(delay_ms));
                    continue;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("operation failed on {}", path.display()),
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sha1_hex_known_vector() {
        // sha1("hi\n")
        assert_eq!(sha1_hex(b"hi\n"), "55ca6286e3e4f4fba5d0448333fa99fc5a404a73");
        assert_eq!(sha1_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn hash_file_matches_buffer_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let data = vec![0xabu8; 100_000];
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&data).unwrap();
        drop(f);
        assert_eq!(hash_file(&path).unwrap(), sha1_hex(&data));
    }

    #[test]
    fn rand_hex_has_requested_length() {
        assert_eq!(rand_hex(15).len(), 15);
        assert_eq!(rand_hex(16).len(), 16);
        assert_ne!(rand_hex(32), rand_hex(32));
    }

    #[test]
    fn retry_io_succeeds_after_failures() {
        let mut calls = 0;
        let out = retry_io(Path::new("x"), 3, 0, || {
            calls += 1;
            if calls < 3 {
                Err(io::Error::new(io::ErrorKind::NotFound, "not yet"))
            } else {
                Ok(42)
            }
        })
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_io_gives_up() {
        let err = retry_io(Path::new("x"), 2, 0, || {
            Err::<(), _>(io::Error::new(io::ErrorKind::NotFound, "gone"))
        })
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
