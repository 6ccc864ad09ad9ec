//! File access with callback indirection.
//!
//! Paths are a first-class URI scheme: a plain path hits the local
//! filesystem, while `callback://<id>/<name>` dispatches to host-supplied
//! read/write callbacks.  Handlers never know which kind they were given;
//! the facade rewrites descriptor paths once and everything downstream stays
//! scheme-agnostic.
//!
//! Callback params are held in a process-global registry keyed by a small
//! integer id embedded in the rewritten name, so the pseudo-URI stays a plain
//! `String` that can travel through descriptors untouched.

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::descriptor::BufferCallbackParams;
use crate::error::{PackagerError, Result};

const CALLBACK_PREFIX: &str = "callback://";

/// Chunk size for draining read callbacks.
const READ_CHUNK: usize = 64 * 1024;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn registry() -> &'static Mutex<HashMap<u64, BufferCallbackParams>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u64, BufferCallbackParams>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register callback params for the lifetime of the process and return the
/// id used by [`make_callback_file_name`].
pub fn register_callbacks(params: &BufferCallbackParams) -> u64 {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    registry().lock().unwrap().insert(id, params.clone());
    tracing::debug!(
        id,
        read = params.read_func.is_some(),
        write = params.write_func.is_some(),
        "Registered buffer callbacks"
    );
    id
}

/// Rewrite `name` to a callback pseudo-URI.  An empty name stays empty so
/// optional outputs remain optional after rewriting.
pub fn make_callback_file_name(id: u64, name: &str) -> String {
    if name.is_empty() {
        String::new()
    } else {
        format!("{CALLBACK_PREFIX}{id}/{name}")
    }
}

fn parse_callback(name: &str) -> Option<(u64, &str)> {
    let rest = name.strip_prefix(CALLBACK_PREFIX)?;
    let (id, inner) = rest.split_once('/')?;
    Some((id.parse().ok()?, inner))
}

fn callbacks_for(id: u64, name: &str) -> Result<BufferCallbackParams> {
    registry()
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .ok_or_else(|| {
            PackagerError::FileFailure(format!("Unknown callback file registration for {name}"))
        })
}

/// `true` when `name` is a callback pseudo-URI.
pub fn is_callback_file_name(name: &str) -> bool {
    name.starts_with(CALLBACK_PREFIX)
}

// ─── Reads ──────────────────────────────────────────────────────────────────

/// Read the whole of `name` into memory.
pub fn read_to_vec(name: &str) -> Result<Vec<u8>> {
    if let Some((id, inner)) = parse_callback(name) {
        let params = callbacks_for(id, name)?;
        let read_func = params.read_func.ok_or_else(|| {
            PackagerError::FileFailure(format!("No read callback registered for {name}"))
        })?;

        let mut out = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = read_func(inner, &mut chunk);
            if n < 0 {
                return Err(PackagerError::FileFailure(format!(
                    "Read callback failed for {name}"
                )));
            }
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n as usize]);
        }
    }

    fs::read(name)
        .map_err(|e| PackagerError::FileFailure(format!("Failed to read {name}: {e}")))
}

/// Read the whole of `name` as UTF-8 text.
pub fn read_to_string(name: &str) -> Result<String> {
    let bytes = read_to_vec(name)?;
    String::from_utf8(bytes)
        .map_err(|_| PackagerError::FileFailure(format!("{name} is not valid UTF-8")))
}

/// Read at most `limit` bytes from the head of `name` for container sniffing.
pub fn read_head(name: &str, limit: usize) -> Result<Vec<u8>> {
    // Callback inputs cannot be partially read without consuming them, so
    // sniffing falls back to a full read there.
    if is_callback_file_name(name) {
        let mut data = read_to_vec(name)?;
        data.truncate(limit);
        return Ok(data);
    }
    use std::io::Read;
    let file = fs::File::open(name)
        .map_err(|e| PackagerError::FileFailure(format!("Failed to open {name}: {e}")))?;
    let mut buf = Vec::with_capacity(limit);
    file.take(limit as u64)
        .read_to_end(&mut buf)
        .map_err(|e| PackagerError::FileFailure(format!("Failed to read {name}: {e}")))?;
    Ok(buf)
}

// ─── Writes ─────────────────────────────────────────────────────────────────

enum WriterKind {
    Local {
        writer: BufWriter<fs::File>,
        path: String,
    },
    Callback {
        write_func: crate::descriptor::WriteCallback,
        name: String,
        full_name: String,
    },
}

/// Streaming writer over either a local file or a write callback.
pub struct FileWriter {
    kind: WriterKind,
    bytes_written: u64,
}

impl FileWriter {
    pub fn create(name: &str) -> Result<Self> {
        let kind = if let Some((id, inner)) = parse_callback(name) {
            let params = callbacks_for(id, name)?;
            let write_func = params.write_func.ok_or_else(|| {
                PackagerError::FileFailure(format!("No write callback registered for {name}"))
            })?;
            WriterKind::Callback {
                write_func,
                name: inner.to_string(),
                full_name: name.to_string(),
            }
        } else {
            if let Some(parent) = Path::new(name).parent().filter(|p| !p.as_os_str().is_empty())
            {
                fs::create_dir_all(parent).map_err(|e| {
                    PackagerError::FileFailure(format!(
                        "Failed to create output directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
            let file = fs::File::create(name).map_err(|e| {
                PackagerError::FileFailure(format!("Failed to create {name}: {e}"))
            })?;
            WriterKind::Local {
                writer: BufWriter::with_capacity(256 * 1024, file),
                path: name.to_string(),
            }
        };
        Ok(Self {
            kind,
            bytes_written: 0,
        })
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.kind {
            WriterKind::Local { writer, path } => {
                writer.write_all(data).map_err(|e| {
                    PackagerError::FileFailure(format!("Failed to write {path}: {e}"))
                })?;
            }
            WriterKind::Callback {
                write_func,
                name,
                full_name,
            } => {
                let n = write_func(name, data);
                if n < 0 || n as usize != data.len() {
                    return Err(PackagerError::FileFailure(format!(
                        "Write callback failed for {full_name}"
                    )));
                }
            }
        }
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Flush buffered bytes and return the total written.
    pub fn close(mut self) -> Result<u64> {
        if let WriterKind::Local { writer, path } = &mut self.kind {
            writer.flush().map_err(|e| {
                PackagerError::FileFailure(format!("Failed to flush {path}: {e}"))
            })?;
        }
        Ok(self.bytes_written)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// One-shot whole-file write.
pub fn write_all(name: &str, data: &[u8]) -> Result<u64> {
    let mut writer = FileWriter::create(name)?;
    writer.write(data)?;
    writer.close()
}

/// Copy `from` to `to`, honouring the callback scheme on both sides.
pub fn copy(from: &str, to: &str) -> Result<u64> {
    let data = read_to_vec(from)?;
    write_all(to, &data)
}
