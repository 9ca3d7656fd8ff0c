//! Key material: `kid` → RSA key pair.
//!
//! Layout on disk (one directory):
//! - `<kid>.pem`      RSA private key (PKCS#1 or PKCS#8). Optional; verifier-only nodes omit it.
//! - `<kid>.pub.pem`  RSA public key (SPKI). Required.
//!
//! The whole mapping is swapped at once on reload, so concurrent verifiers see
//! either the old set or the new set, never a mix.
use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use arc_swap::ArcSwap;
use jsonwebtoken::{DecodingKey, EncodingKey};
use thiserror::Error;
use tracing::info;

const PRIVATE_SUFFIX: &str = ".pem";
const PUBLIC_SUFFIX: &str = ".pub.pem";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("unknown key id: {0}")]
    UnknownKey(String),
    #[error("no private key for key id: {0}")]
    MissingPrivateKey(String),
    #[error("no public key for key id: {0}")]
    MissingPublicKey(String),
    #[error("invalid pem for key id {kid}: {source}")]
    InvalidPem {
        kid: String,
        #[source]
        source: jsonwebtoken::errors::Error,
    },
    #[error("reading key store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("key store {0} has no keys")]
    Empty(PathBuf),
}

/// One key pair. The private half is only present where tokens are issued.
#[derive(Clone)]
pub struct KeyPair {
    private: Option<EncodingKey>,
    public: DecodingKey,
    public_pem: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print key material
        f.debug_struct("KeyPair")
            .field("has_private", &self.private.is_some())
            .finish()
    }
}

impl KeyPair {
    pub fn from_pem(kid: &str, private_pem: Option<&str>, public_pem: &str) -> Result<Self, KeyError> {
        let invalid = |source| KeyError::InvalidPem {
            kid: kid.to_string(),
            source,
        };

        let private = private_pem
            .map(|pem| EncodingKey::from_rsa_pem(pem.as_bytes()))
            .transpose()
            .map_err(invalid)?;
        let public = DecodingKey::from_rsa_pem(public_pem.as_bytes()).map_err(invalid)?;

        Ok(Self {
            private,
            public,
            public_pem: public_pem.to_string(),
        })
    }

    pub fn private_key(&self) -> Option<&EncodingKey> {
        self.private.as_ref()
    }

    pub fn public_key(&self) -> &DecodingKey {
        &self.public
    }

    /// PEM text of the public key, handed to the policy evaluator.
    pub fn public_key_pem(&self) -> &str {
        &self.public_pem
    }
}

/// An immutable set of key pairs. Build one, then install it into a `KeyRing`.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, Arc<KeyPair>>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        kid: impl Into<String>,
        private_pem: Option<&str>,
        public_pem: &str,
    ) -> Result<(), KeyError> {
        let kid = kid.into();
        let pair = KeyPair::from_pem(&kid, private_pem, public_pem)?;
        self.keys.insert(kid, Arc::new(pair));
        Ok(())
    }

    /// Load every key pair found in `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, KeyError> {
        let dir = dir.as_ref();
        let io = |source| KeyError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut private: HashMap<String, String> = HashMap::new();
        let mut public: HashMap<String, String> = HashMap::new();

        for entry in fs::read_dir(dir).map_err(io)? {
            let path = entry.map_err(io)?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            // `.pub.pem` also ends in `.pem`, so test it first.
            let (kid, bucket) = if let Some(kid) = name.strip_suffix(PUBLIC_SUFFIX) {
                (kid.to_string(), &mut public)
            } else if let Some(kid) = name.strip_suffix(PRIVATE_SUFFIX) {
                (kid.to_string(), &mut private)
            } else {
                continue;
            };

            let pem = fs::read_to_string(&path).map_err(|source| KeyError::Io {
                path: path.clone(),
                source,
            })?;
            bucket.insert(kid, pem);
        }

        if let Some(kid) = private.keys().find(|kid| !public.contains_key(*kid)) {
            return Err(KeyError::MissingPublicKey(kid.clone()));
        }
        if public.is_empty() {
            return Err(KeyError::Empty(dir.to_path_buf()));
        }

        let mut set = Self::new();
        for (kid, public_pem) in &public {
            set.insert(kid.clone(), private.get(kid).map(String::as_str), public_pem)?;
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Process-wide key lookup, shared read-only by every request.
pub struct KeyRing {
    current: ArcSwap<KeySet>,
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing").field("kids", &self.kids()).finish()
    }
}

impl KeyRing {
    pub fn new(keys: KeySet) -> Self {
        Self {
            current: ArcSwap::from_pointee(keys),
        }
    }

    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, KeyError> {
        Ok(Self::new(KeySet::from_dir(dir)?))
    }

    /// Resolve a key pair by id.
    pub fn get(&self, kid: &str) -> Result<Arc<KeyPair>, KeyError> {
        self.current
            .load()
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| KeyError::UnknownKey(kid.to_string()))
    }

    /// Like `get`, but the pair must be able to sign.
    pub fn signing_key(&self, kid: &str) -> Result<EncodingKey, KeyError> {
        self.get(kid)?
            .private_key()
            .cloned()
            .ok_or_else(|| KeyError::MissingPrivateKey(kid.to_string()))
    }

    pub fn kids(&self) -> Vec<String> {
        let mut kids: Vec<String> = self.current.load().keys.keys().cloned().collect();
        kids.sort();
        kids
    }

    /// Install a whole new key set.
    pub fn replace(&self, keys: KeySet) {
        self.current.store(Arc::new(keys));
    }

    /// Re-read `dir` and swap it in. On error the previous set stays installed.
    pub fn reload(&self, dir: impl AsRef<Path>) -> Result<usize, KeyError> {
        let keys = KeySet::from_dir(dir.as_ref())?;
        let count = keys.len();
        self.replace(keys);
        info!(dir = %dir.as_ref().display(), keys = count, "key store reloaded");
        Ok(count)
    }
}
