//! Session record file.
//!
//! Layout (little-endian):
//!
//! ```text
//! +-----------+-----+-----------+-----+-------+-----+---------+-----+--------+
//! | server_id | len | serverUrl | len | token | len | temp_id | crc32c       |
//! | i32       | u32 | utf-8     | u32 | utf-8 | u32 | utf-8   | u32          |
//! +-----------+-----+-----------+-----+-------+-----+---------+--------------+
//! ```
//!
//! The checksum covers every preceding byte.

use crate::error::StorageError;
use bytes::{Buf, BufMut, BytesMut};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use warbot_protocol::Session;

/// File name of the session record inside the data directory.
pub const SESSION_FILE: &str = "session.dat";

const CHECKSUM_SIZE: usize = 4;

/// Loads and saves the session record.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Opens the store, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    /// Loads the saved session.
    ///
    /// A missing file yields `None`. So does a corrupt one, with a warning.
    pub fn load(&self) -> Result<Option<Session>, StorageError> {
        let path = self.path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match decode(&data) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!("Ignoring session file {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Saves the session, replacing any previous record.
    pub fn save(&self, session: &Session) -> Result<(), StorageError> {
        let data = encode(session)?;
        let path = self.path();
        let tmp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &path)?;

        tracing::debug!("Saved session for S{} to {}", session.server_id, path.display());
        Ok(())
    }

    /// Removes the saved session, if any.
    pub fn clear(&self) -> Result<(), StorageError> {
        match fs::remove_file(self.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn encode(session: &Session) -> Result<Vec<u8>, StorageError> {
    let mut buf = BytesMut::new();
    buf.put_i32_le(session.server_id);
    for field in [
        &session.server_url,
        &session.auth_token,
        &session.device_temp_id,
    ] {
        let len = u32::try_from(field.len()).map_err(|_| StorageError::FieldTooLarge(field.len()))?;
        buf.put_u32_le(len);
        buf.put_slice(field.as_bytes());
    }
    let crc = crc32c::crc32c(&buf);
    buf.put_u32_le(crc);
    Ok(buf.to_vec())
}

fn decode(data: &[u8]) -> Result<Session, StorageError> {
    if data.len() < 4 + CHECKSUM_SIZE {
        return Err(StorageError::Corruption(format!(
            "record too short: {} bytes",
            data.len()
        )));
    }
    let (body, mut trailer) = data.split_at(data.len() - CHECKSUM_SIZE);
    let crc_expected = trailer.get_u32_le();
    let crc_actual = crc32c::crc32c(body);
    if crc_expected != crc_actual {
        return Err(StorageError::Corruption(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            crc_expected, crc_actual
        )));
    }

    let mut buf = body;
    let server_id = buf.get_i32_le();
    let server_url = read_string(&mut buf)?;
    let auth_token = read_string(&mut buf)?;
    let device_temp_id = read_string(&mut buf)?;
    if buf.has_remaining() {
        return Err(StorageError::Corruption(format!(
            "{} trailing bytes",
            buf.remaining()
        )));
    }

    Ok(Session {
        server_id,
        server_url,
        auth_token,
        device_temp_id,
    })
}

fn read_string(buf: &mut &[u8]) -> Result<String, StorageError> {
    if buf.remaining() < 4 {
        return Err(StorageError::Corruption("truncated length".to_string()));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(StorageError::Corruption(format!(
            "field of {} bytes exceeds record",
            len
        )));
    }
    let (field, rest) = buf.split_at(len);
    let value = String::from_utf8(field.to_vec())
        .map_err(|e| StorageError::Corruption(format!("invalid UTF-8: {}", e)))?;
    *buf = rest;
    Ok(value)
}
