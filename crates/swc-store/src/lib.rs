//! Encrypted persistence for session data that outlives the app
//!
//! Stores the character name, refresh token and browser cookie in a single
//! per-application file, encrypted so that only the OS user account that
//! wrote it can read it back. The encryption key lives in the system
//! keyring with a machine-id derived fallback when no keyring is available.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use swc_types::{SdkError, SdkResult};
use tracing::{debug, warn};

const KEYRING_SERVICE: &str = "SWCombine SDK";
const ENCRYPTION_KEY_NAME: &str = "swcombine-session-encryption";
const FILENAME: &str = ".data";

/// Length of the random salt prefixed to every saved blob.
pub const SALT_LEN: usize = 20;
const NONCE_LEN: usize = 12;

/// In-memory cache for the master key (stays consistent within a process)
static MASTER_KEY_CACHE: OnceLock<[u8; 32]> = OnceLock::new();

/// Session data that needs to persist after the app is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCredential {
    /// Name of the character the app acts on behalf of.
    pub character: Option<String>,

    /// Refresh token that can be used to obtain a new access token.
    pub refresh_token: Option<String>,

    /// Browser cookie, saved so the user does not have to log in again.
    pub cookie: Option<String>,
}

/// Encrypted store for a [`PersistedCredential`].
///
/// On-disk format is `salt(20) ‖ ciphertext` with no plaintext header. The
/// per-save key is derived from the master key and the salt, so encrypting
/// the same credential twice never yields the same bytes. Not portable
/// across machines or user accounts by design.
pub struct PersistentStore {
    path: PathBuf,
    key: [u8; 32],
    shared: bool,
}

impl PersistentStore {
    /// Open the store at its default per-user location.
    ///
    /// When `shared` is true (app runs on a shared machine) the store never
    /// writes anything and `load` always reports no prior session.
    pub fn open(shared: bool) -> SdkResult<Self> {
        Ok(Self {
            path: data_file()?,
            key: master_key(),
            shared,
        })
    }

    /// Open a store over an explicit path and master key.
    ///
    /// Bypasses the keyring; used by tests and embedders that manage their
    /// own key material.
    pub fn with_key(path: PathBuf, key: [u8; 32], shared: bool) -> Self {
        Self { path, key, shared }
    }

    /// Encrypt and write the credential. No-op in shared mode.
    pub fn save(&self, credential: &PersistedCredential) -> SdkResult<()> {
        if self.shared {
            debug!("Shared machine, skipping credential save");
            return Ok(());
        }

        let plaintext = serde_json::to_vec(credential)?;

        // Fresh salt per save; also provides the nonce.
        let rng = SystemRandom::new();
        let mut salt = [0u8; SALT_LEN];
        rng.fill(&mut salt)
            .map_err(|_| SdkError::Internal("Failed to generate salt".to_string()))?;

        let ciphertext = seal(&self.key, &salt, &plaintext)?;

        let mut blob = Vec::with_capacity(SALT_LEN + ciphertext.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&ciphertext);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, &blob)?;

        // User read/write only (Unix)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&self.path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(&self.path, perms)?;
        }

        debug!("Saved encrypted credential to {}", self.path.display());
        Ok(())
    }

    /// Read and decrypt the stored credential.
    ///
    /// Returns `None` when no file exists, when the blob was written under
    /// a different security context, or when the bytes are corrupt. Only
    /// unexpected I/O failures propagate.
    pub fn load(&self) -> SdkResult<Option<PersistedCredential>> {
        if self.shared || !self.path.exists() {
            return Ok(None);
        }

        let blob = std::fs::read(&self.path)?;
        if blob.len() <= SALT_LEN {
            warn!("Stored credential is truncated, treating as absent");
            return Ok(None);
        }

        let (salt, ciphertext) = blob.split_at(SALT_LEN);
        let plaintext = match open(&self.key, salt, ciphertext) {
            Ok(p) => p,
            Err(_) => {
                // Wrong user account or corrupt bytes; either way the
                // session is unusable and we continue without one.
                debug!("Stored credential failed to decrypt, treating as absent");
                return Ok(None);
            }
        };

        match serde_json::from_slice(&plaintext) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!("Stored credential failed to parse: {}", e);
                Ok(None)
            }
        }
    }
}

/// Derive the per-save key: SHA-256(master ‖ salt).
fn save_key(master: &[u8; 32], salt: &[u8]) -> [u8; 32] {
    let mut input = Vec::with_capacity(master.len() + salt.len());
    input.extend_from_slice(master);
    input.extend_from_slice(salt);
    let digest = ring::digest::digest(&ring::digest::SHA256, &input);
    let mut key = [0u8; 32];
    key.copy_from_slice(digest.as_ref());
    key
}

fn seal(master: &[u8; 32], salt: &[u8], plaintext: &[u8]) -> SdkResult<Vec<u8>> {
    let unbound = UnboundKey::new(&AES_256_GCM, &save_key(master, salt))
        .map_err(|_| SdkError::Internal("Failed to create encryption key".to_string()))?;
    let sealing_key = LessSafeKey::new(unbound);

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&salt[..NONCE_LEN]);
    let nonce = Nonce::assume_unique_for_key(nonce);

    let mut data = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut data)
        .map_err(|_| SdkError::Internal("Failed to encrypt credential".to_string()))?;
    Ok(data)
}

fn open(master: &[u8; 32], salt: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, ring::error::Unspecified> {
    let unbound = UnboundKey::new(&AES_256_GCM, &save_key(master, salt))?;
    let opening_key = LessSafeKey::new(unbound);

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&salt[..NONCE_LEN]);
    let nonce = Nonce::assume_unique_for_key(nonce);

    let mut data = ciphertext.to_vec();
    let plaintext = opening_key.open_in_place(nonce, Aad::empty(), &mut data)?;
    Ok(plaintext.to_vec())
}

/// Per-application storage file: `~/.swcombine-sdk/.data`
fn data_file() -> SdkResult<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SdkError::Internal("Could not determine home directory".to_string()))?;
    Ok(home.join(".swcombine-sdk").join(FILENAME))
}

/// Get or create the master encryption key.
///
/// Preferred source is the system keyring, which is scoped to the current
/// OS user account. Without keyring access the key is derived from the
/// machine id and username, which keeps the blob unreadable from other
/// accounts on a sanely configured machine but will not survive an OS
/// reinstall.
fn master_key() -> [u8; 32] {
    *MASTER_KEY_CACHE.get_or_init(|| match keyring::Entry::new(KEYRING_SERVICE, ENCRYPTION_KEY_NAME)
    {
        Ok(entry) => {
            match entry.get_password() {
                Ok(key_str) => {
                    if let Ok(key_bytes) = hex::decode(&key_str) {
                        if key_bytes.len() == 32 {
                            let mut key = [0u8; 32];
                            key.copy_from_slice(&key_bytes);
                            debug!("Retrieved encryption key from system keyring");
                            return key;
                        }
                    }
                    warn!("Invalid encryption key in keyring, generating new one");
                }
                Err(keyring::Error::NoEntry) => {
                    debug!("No encryption key in keyring, generating new one");
                }
                Err(e) => {
                    warn!("Failed to retrieve encryption key from keyring: {}", e);
                }
            }
            generate_key(&entry)
        }
        Err(e) => {
            warn!("Failed to access system keyring: {}", e);
            derived_fallback_key()
        }
    })
}

/// Generate a new master key and store it in the keyring.
fn generate_key(entry: &keyring::Entry) -> [u8; 32] {
    let rng = SystemRandom::new();
    let mut key = [0u8; 32];
    if rng.fill(&mut key).is_err() {
        warn!("Secure random unavailable, deriving key from machine id");
        return derived_fallback_key();
    }

    if let Err(e) = entry.set_password(&hex::encode(key)) {
        warn!("Failed to store encryption key in keyring: {}", e);
        warn!("Sessions saved now may not decrypt after a restart");
    } else {
        debug!("Stored new encryption key in system keyring");
    }

    key
}

/// Key derived from machine id + username, used when no keyring is present.
fn derived_fallback_key() -> [u8; 32] {
    let machine_id = machine_uid::get().unwrap_or_else(|_| "fallback-id".to_string());
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let digest = ring::digest::digest(
        &ring::digest::SHA256,
        format!("{}:{}", machine_id, user).as_bytes(),
    );
    let mut key = [0u8; 32];
    key.copy_from_slice(digest.as_ref());
    key
}
