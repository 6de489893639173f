//! Store identity header
//!
//! The identity is written once when a store is created and validated on
//! every recovery. It is the only persisted structure the transactional
//! core mandates; each backend owns the rest of its on-disk format.
//!
//! # Layout
//!
//! ```text
//! ┌──────────┬─────────────┬──────────┬───────────┬───────────────┬──────────┬──────────┬──────────┐
//! │ Magic (4)│ Format (4)  │ Kind (1) │ Rsvd (3)  │ Epoch µs (8)  │ NameLen 4│ Name     │ CRC32 (4)│
//! └──────────┴─────────────┴──────────┴───────────┴───────────────┴──────────┴──────────┴──────────┘
//! ```

use chrono::{DateTime, TimeZone, Utc};
use crc32fast::Hasher;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::{StoreError, StoreResult};
use crate::provider::ProviderKind;

/// Magic bytes identifying an identity header: "RSID"
pub const IDENTITY_MAGIC: [u8; 4] = *b"RSID";

/// Current identity header format version
pub const IDENTITY_FORMAT_VERSION: u32 = 1;

/// Maximum store name length in bytes
pub const MAX_STORE_NAME_LENGTH: usize = 256;

const FIXED_HEADER_SIZE: usize = 4 + 4 + 1 + 3 + 8 + 4;

/// Immutable identity of a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreIdentity {
    name: String,
    provider_kind: ProviderKind,
    creation_epoch: DateTime<Utc>,
}

impl StoreIdentity {
    /// Create the identity for a new store
    ///
    /// Rejects an invalid name and the `Unknown` provider kind.
    pub fn new(name: impl Into<String>, provider_kind: ProviderKind) -> StoreResult<Self> {
        let name = name.into();
        validate_name(&name)?;
        provider_kind.ensure_selectable()?;
        Ok(StoreIdentity {
            name,
            provider_kind,
            // Truncate to microseconds so the value survives encoding exactly
            creation_epoch: micros_to_datetime(Utc::now().timestamp_micros()),
        })
    }

    /// Store name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend kind bound to this store
    pub fn provider_kind(&self) -> ProviderKind {
        self.provider_kind
    }

    /// When the store was created
    pub fn creation_epoch(&self) -> DateTime<Utc> {
        self.creation_epoch
    }

    /// Serialize to the persisted header
    pub fn encode(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let mut bytes = Vec::with_capacity(FIXED_HEADER_SIZE + name.len() + 4);
        bytes.extend_from_slice(&IDENTITY_MAGIC);
        bytes.extend_from_slice(&IDENTITY_FORMAT_VERSION.to_le_bytes());
        bytes.push(self.provider_kind.to_tag());
        bytes.extend_from_slice(&[0u8; 3]);
        bytes.extend_from_slice(&self.creation_epoch.timestamp_micros().to_le_bytes());
        bytes.extend_from_slice(&(name.len() as u32).to_le_bytes());
        bytes.extend_from_slice(name);
        let crc = compute_crc(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Deserialize a persisted header
    ///
    /// Never runs the constructor's validation of the provider kind: a header
    /// written by a newer release decodes with `ProviderKind::Unknown` and
    /// the caller decides what to do with it.
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        if bytes.len() < FIXED_HEADER_SIZE + 4 {
            return Err(StoreError::corruption(format!(
                "identity header truncated: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0..4] != IDENTITY_MAGIC {
            return Err(StoreError::corruption("identity header has invalid magic bytes"));
        }

        let body = &bytes[..bytes.len() - 4];
        let stored_crc = read_u32(&bytes[bytes.len() - 4..]);
        let computed_crc = compute_crc(body);
        if stored_crc != computed_crc {
            return Err(StoreError::corruption(format!(
                "identity header checksum mismatch: expected {:08x}, computed {:08x}",
                stored_crc, computed_crc
            )));
        }

        let format_version = read_u32(&bytes[4..8]);
        if format_version != IDENTITY_FORMAT_VERSION {
            return Err(StoreError::corruption(format!(
                "unsupported identity header format version {}",
                format_version
            )));
        }

        let provider_kind = ProviderKind::from_tag(bytes[8]);
        let epoch_micros = i64::from_le_bytes(to_array8(&bytes[12..20]));
        let name_len = read_u32(&bytes[20..24]) as usize;
        if FIXED_HEADER_SIZE + name_len + 4 != bytes.len() {
            return Err(StoreError::corruption(format!(
                "identity header name length {} does not match header size {}",
                name_len,
                bytes.len()
            )));
        }
        let name = std::str::from_utf8(&bytes[FIXED_HEADER_SIZE..FIXED_HEADER_SIZE + name_len])
            .map_err(|_| StoreError::corruption("identity header name is not valid UTF-8"))?
            .to_string();

        Ok(StoreIdentity {
            name,
            provider_kind,
            creation_epoch: micros_to_datetime(epoch_micros),
        })
    }

    /// Write the header to `path`, failing if it already exists
    pub fn write_new(&self, path: &Path) -> StoreResult<()> {
        let tmp = path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .map_err(|e| StoreError::io_context("create identity header", e))?;
            file.write_all(&self.encode())?;
            file.sync_all()?;
        }
        if path.exists() {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::validation(format!(
                "store identity already exists at {}",
                path.display()
            )));
        }
        fs::rename(&tmp, path).map_err(|e| StoreError::io_context("install identity header", e))?;
        if let Some(parent) = path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }

    /// Read and validate the header at `path`
    pub fn read_from(path: &Path) -> StoreResult<Self> {
        let bytes = fs::read(path).map_err(|e| StoreError::io_context("read identity header", e))?;
        Self::decode(&bytes)
    }
}

fn validate_name(name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(StoreError::validation("store name must not be empty"));
    }
    if name.len() > MAX_STORE_NAME_LENGTH {
        return Err(StoreError::validation(format!(
            "store name is {} bytes, maximum is {}",
            name.len(),
            MAX_STORE_NAME_LENGTH
        )));
    }
    if let Some(c) = name.chars().find(|c| c.is_control()) {
        return Err(StoreError::validation(format!(
            "store name contains control character {:?}",
            c
        )));
    }
    Ok(())
}

fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros)
        .single()
        .unwrap_or_default()
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn to_array8(bytes: &[u8]) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    buf
}
