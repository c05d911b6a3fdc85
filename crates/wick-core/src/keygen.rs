//! ed25519 key pairs for cryptosign authentication.

use std::fs;
use std::path::{Path, PathBuf};

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use crate::auth;
use crate::Result;

pub const PRIVATE_KEY_FILE: &str = "key";
pub const PUBLIC_KEY_FILE: &str = "key.pub";

/// A hex-encoded key pair. The private half is the 32-byte seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public_hex: String,
    pub private_hex: String,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_signing_key(&SigningKey::generate(&mut OsRng))
    }

    /// Rebuild a key pair from a hex-encoded seed.
    pub fn from_seed_hex(seed: &str) -> Result<Self> {
        let seed = auth::decode_seed(seed)?;
        Ok(Self::from_signing_key(&SigningKey::from_bytes(&seed)))
    }

    fn from_signing_key(key: &SigningKey) -> Self {
        Self {
            public_hex: hex::encode(key.verifying_key().to_bytes()),
            private_hex: hex::encode(key.to_bytes()),
        }
    }

    /// The `keygen` console output.
    pub fn display(&self) -> String {
        format!(
            "Public Key: {}\nPrivate Key: {}\n",
            self.public_hex, self.private_hex
        )
    }

    /// Write `key` (owner-only) and `key.pub` into `dir`. Returns both paths.
    pub fn write_to(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        let private = dir.join(PRIVATE_KEY_FILE);
        let public = dir.join(PUBLIC_KEY_FILE);
        write_with_mode(&private, &self.private_hex, 0o600)?;
        write_with_mode(&public, &self.public_hex, 0o644)?;
        Ok((private, public))
    }
}

/// The file is created with `mode`, so the key is never readable by others.
/// An existing file keeps its mode on open and is tightened afterwards.
#[cfg(unix)]
fn write_with_mode(path: &Path, contents: &str, mode: u32) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    file.set_permissions(fs::Permissions::from_mode(mode))?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

#[cfg(not(unix))]
fn write_with_mode(path: &Path, contents: &str, _mode: u32) -> Result<()> {
    fs::write(path, contents)?;
    Ok(())
}
