// Copyright (c) 2024 Botho Foundation

//! On-disk key records.
//!
//! A slot `<path>` maps to two files:
//!
//! - `<path>.i2p.private`: the destination's base64 form on the first line,
//!   the combined blob on the second.
//! - `<path>.i2p.public.txt`: the `.b32.i2p` short form, for humans.
//!
//! The two-line record is private to this crate and round-trips exactly
//! through [`store_keys`] and [`load_keys`].

use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use crate::destination::Destination;
use crate::error::{KeyError, KeyResult};
use crate::keypair::KeyPair;

/// Suffix of the private key record.
pub const PRIVATE_SUFFIX: &str = ".i2p.private";

/// Suffix of the short-form sidecar.
pub const PUBLIC_TXT_SUFFIX: &str = ".i2p.public.txt";

fn with_suffix(slot: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(slot.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Path of the private record for a slot.
pub fn private_key_path<P: AsRef<Path>>(slot: P) -> PathBuf {
    with_suffix(slot.as_ref(), PRIVATE_SUFFIX)
}

/// Path of the short-form sidecar for a slot.
pub fn public_txt_path<P: AsRef<Path>>(slot: P) -> PathBuf {
    with_suffix(slot.as_ref(), PUBLIC_TXT_SUFFIX)
}

/// Serialize a key pair as the two-line record.
pub fn write_keys<W: Write>(keys: &KeyPair, mut writer: W) -> KeyResult<()> {
    writer.write_all(keys.destination().to_base64().as_bytes())?;
    writer.write_all(b"\n")?;
    writer.write_all(keys.combined().as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Parse a two-line record.
pub fn read_keys<R: Read>(mut reader: R) -> KeyResult<KeyPair> {
    let mut contents = String::new();
    reader.read_to_string(&mut contents)?;

    let mut lines = contents.lines();
    let destination = lines
        .next()
        .filter(|line| !line.trim().is_empty())
        .ok_or_else(|| KeyError::KeyFile("missing destination line".to_string()))?;
    let combined = lines
        .next()
        .filter(|line| !line.trim().is_empty())
        .ok_or_else(|| KeyError::KeyFile("missing private key line".to_string()))?;

    let destination: Destination = destination.parse()?;
    KeyPair::from_parts(destination, combined)
}

/// Write the private record for `slot`, readable by the owner only.
pub fn store_keys<P: AsRef<Path>>(keys: &KeyPair, slot: P) -> KeyResult<PathBuf> {
    let path = private_key_path(slot);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    write_keys(keys, create_private(&path)?)?;
    Ok(path)
}

/// Open `path` for writing with owner-only permissions before any byte lands.
#[cfg(unix)]
fn create_private(path: &Path) -> KeyResult<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies to newly created files.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> KeyResult<File> {
    Ok(OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}

/// Load the private record for `slot`, or `None` if there is none yet.
pub fn load_keys<P: AsRef<Path>>(slot: P) -> KeyResult<Option<KeyPair>> {
    match File::open(private_key_path(slot)) {
        Ok(file) => read_keys(file).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write the short form for `slot` next to its private record.
pub fn write_short_form_file<P: AsRef<Path>>(keys: &KeyPair, slot: P) -> KeyResult<PathBuf> {
    let path = public_txt_path(slot);
    fs::write(&path, keys.destination().to_base32())?;
    Ok(path)
}
