use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};

use courier_api::{BackendError, TopicRecord};

// ════════════════════════════════════════════════════════════════
//  On-disk record format
// ════════════════════════════════════════════════════════════════

/// One line of a topic file. The payload is base64 so arbitrary bytes
/// survive the JSON line.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct DiskRecord {
    pub key: String,
    pub payload: String,
    pub ts_ms: i64,
}

impl DiskRecord {
    pub(crate) fn from_record(record: &TopicRecord, ts_ms: i64) -> Self {
        Self {
            key: record.key.clone(),
            payload: base64::engine::general_purpose::STANDARD.encode(&record.payload),
            ts_ms,
        }
    }

    pub(crate) fn to_line(&self) -> Result<Vec<u8>, BackendError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Parse a stored line into `(key, payload)`.
pub(crate) fn parse_line(line: &[u8]) -> Result<(String, Vec<u8>), BackendError> {
    let rec: DiskRecord = serde_json::from_slice(line)
        .map_err(|e| BackendError::format(format!("parse line: {e}")))?;
    let payload = base64::engine::general_purpose::STANDARD
        .decode(rec.payload.as_bytes())
        .map_err(|e| BackendError::format(format!("base64 decode: {e}")))?;
    Ok((rec.key, payload))
}

// ════════════════════════════════════════════════════════════════
//  Line helpers
// ════════════════════════════════════════════════════════════════

/// Append one complete line and return its line index.
///
/// A torn tail left by an interrupted append is terminated first, so it
/// becomes one malformed line of its own and `line` starts on a fresh one.
/// Callers serialize appends to the same file.
pub(crate) fn append_line(path: &Path, line: &[u8]) -> Result<u64, BackendError> {
    let mut f = std::fs::OpenOptions::new()
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| open_err(path, e))?;

    let scan = scan_lines(&mut f).map_err(|e| BackendError::io(format!("scan {}: {e}", path.display())))?;
    let mut offset = scan.complete;
    if scan.torn {
        tracing::warn!(path = %path.display(), line = offset, "terminating torn line");
        f.write_all(b"\n")
            .map_err(|e| BackendError::io(format!("append {}: {e}", path.display())))?;
        offset += 1;
    }
    f.write_all(line)
        .and_then(|_| f.sync_data())
        .map_err(|e| BackendError::io(format!("append {}: {e}", path.display())))?;
    Ok(offset)
}

/// Read the line starting at byte `pos`. `None` if no complete line is
/// there yet. Returns the line without its newline and the byte position
/// of the next line.
pub(crate) fn read_line_at(path: &Path, pos: u64) -> Result<Option<(Vec<u8>, u64)>, BackendError> {
    let mut f = std::fs::File::open(path).map_err(|e| open_err(path, e))?;
    f.seek(SeekFrom::Start(pos))
        .map_err(|e| BackendError::io(format!("seek {}: {e}", path.display())))?;

    let mut buf = Vec::new();
    let n = BufReader::new(f)
        .read_until(b'\n', &mut buf)
        .map_err(|e| BackendError::io(format!("read {}: {e}", path.display())))?;
    if n == 0 || buf.last() != Some(&b'\n') {
        return Ok(None);
    }
    buf.pop();
    Ok(Some((buf, pos + n as u64)))
}

/// Byte position where line `index` starts. `None` if the file has fewer
/// complete lines than `index`.
pub(crate) fn locate_line(path: &Path, index: u64) -> Result<Option<u64>, BackendError> {
    let f = std::fs::File::open(path).map_err(|e| open_err(path, e))?;
    let mut reader = BufReader::new(f);
    let mut pos = 0u64;
    let mut buf = Vec::new();
    for _ in 0..index {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| BackendError::io(format!("read {}: {e}", path.display())))?;
        if n == 0 || buf.last() != Some(&b'\n') {
            return Ok(None);
        }
        pos += n as u64;
    }
    Ok(Some(pos))
}

struct LineScan {
    /// Newline-terminated lines.
    complete: u64,
    /// The file ends in bytes without a newline.
    torn: bool,
}

fn scan_lines(f: &mut std::fs::File) -> std::io::Result<LineScan> {
    f.seek(SeekFrom::Start(0))?;
    let mut complete = 0u64;
    let mut last = None;
    let mut chunk = [0u8; 8192];
    loop {
        let n = f.read(&mut chunk)?;
        if n == 0 {
            return Ok(LineScan {
                complete,
                torn: last.is_some_and(|b| b != b'\n'),
            });
        }
        complete += chunk[..n].iter().filter(|&&b| b == b'\n').count() as u64;
        last = chunk[..n].last().copied();
    }
}

// ════════════════════════════════════════════════════════════════
//  Committed offsets
// ════════════════════════════════════════════════════════════════

/// Committed offset of a group. Missing file means nothing committed.
pub(crate) fn read_offset(path: &Path) -> Result<u64, BackendError> {
    match std::fs::read_to_string(path) {
        Ok(s) => s
            .trim()
            .parse()
            .map_err(|e| BackendError::format(format!("offset file {}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(BackendError::io(format!("read {}: {e}", path.display()))),
    }
}

/// Replace the offset file through a temp file and rename.
pub(crate) fn write_offset(path: &Path, offset: u64) -> Result<(), BackendError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.tmp", std::process::id()));
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, offset.to_string())
        .map_err(|e| BackendError::io(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        BackendError::io(format!("rename {}: {e}", path.display()))
    })
}

fn open_err(path: &Path, e: std::io::Error) -> BackendError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BackendError::not_found(format!("topic file {} does not exist", path.display()))
    } else {
        BackendError::io(format!("open {}: {e}", path.display()))
    }
}
