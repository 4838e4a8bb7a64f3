//! WireGuard key material and the per-run key manager.
//!
//! Keys are Curve25519, 32 bytes, exchanged with the kernel as base64. Private
//! and preshared keys zero their memory on drop and never print their value.

use crate::context::KeyGenerator;
use crate::topology::Edge;
use base64::Engine;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Errors decoding key material.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// Input is not base64
    #[error("invalid base64 key: {0}")]
    InvalidBase64(String),
    /// Decoded key has the wrong length
    #[error("invalid key length {0}, expected 32")]
    InvalidLength(usize),
}

fn decode_key(s: &str) -> Result<[u8; KEY_SIZE], KeyError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(s.trim())
        .map_err(|e| KeyError::InvalidBase64(e.to_string()))?;
    if bytes.len() != KEY_SIZE {
        return Err(KeyError::InvalidLength(bytes.len()));
    }
    let mut arr = [0u8; KEY_SIZE];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// A WireGuard public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Creates a public key from raw bytes.
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Encodes the key the way `wg` prints it.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Decodes a key printed by `wg`.
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode_key(s).map(Self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b64 = self.to_base64();
        write!(f, "PublicKey({}...)", &b64[..8])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

impl From<X25519PublicKey> for PublicKey {
    fn from(key: X25519PublicKey) -> Self {
        Self(*key.as_bytes())
    }
}

/// A WireGuard private key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; KEY_SIZE]);

impl PrivateKey {
    /// Generates a new key from the OS random source.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self(secret.to_bytes())
    }

    /// Creates a private key from raw bytes.
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Derives the matching public key.
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey::from(X25519PublicKey::from(&secret))
    }

    /// Base64 file content, zeroed when dropped.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(base64::engine::general_purpose::STANDARD.encode(self.0))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for PrivateKey {}

/// A WireGuard preshared key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PresharedKey([u8; KEY_SIZE]);

impl PresharedKey {
    /// Generates a new key from the OS random source.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Creates a preshared key from raw bytes.
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Base64 file content, zeroed when dropped.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(base64::engine::general_purpose::STANDARD.encode(self.0))
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PresharedKey([REDACTED])")
    }
}

impl PartialEq for PresharedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for PresharedKey {}

/// Key generator backed by `x25519-dalek` and the OS random source.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsKeyGenerator;

impl KeyGenerator for OsKeyGenerator {
    fn generate_keypair(&self) -> (PrivateKey, PublicKey) {
        let private = PrivateKey::generate();
        let public = private.public_key();
        (private, public)
    }

    fn generate_preshared(&self) -> PresharedKey {
        PresharedKey::generate()
    }
}

/// A node's identity as known to this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Already deployed on the host; only the public half is known
    Existing(PublicKey),
    /// Generated during this run; the private half must be installed
    Fresh {
        /// Public half
        public: PublicKey,
        /// Private half
        private: PrivateKey,
    },
}

impl Identity {
    /// Public half of the identity.
    pub fn public_key(&self) -> PublicKey {
        match self {
            Self::Existing(public) | Self::Fresh { public, .. } => *public,
        }
    }

    /// Private half, present only when generated in this run.
    pub fn private_key(&self) -> Option<&PrivateKey> {
        match self {
            Self::Existing(_) => None,
            Self::Fresh { private, .. } => Some(private),
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh { .. })
    }
}

/// An edge's preshared key as known to this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preshared {
    /// Already stored on both ends
    Existing,
    /// Generated during this run
    Fresh(PresharedKey),
}

impl Preshared {
    /// Key material, present only when generated in this run.
    pub fn key(&self) -> Option<&PresharedKey> {
        match self {
            Self::Existing => None,
            Self::Fresh(key) => Some(key),
        }
    }
}

/// Holds every identity and preshared key for the duration of one run.
///
/// Existing remote identities are adopted from observations; everything
/// else is generated on first request and then returned unchanged for the
/// rest of the run. The manager never holds a private key it did not
/// generate itself.
pub struct KeyManager<'g> {
    generator: &'g dyn KeyGenerator,
    identities: HashMap<String, Identity>,
    preshared: HashMap<Edge, Preshared>,
}

impl<'g> KeyManager<'g> {
    /// Create an empty manager drawing fresh material from `generator`.
    pub fn new(generator: &'g dyn KeyGenerator) -> Self {
        Self {
            generator,
            identities: HashMap::new(),
            preshared: HashMap::new(),
        }
    }

    /// Keep the identity already deployed on `node`.
    ///
    /// Ignored when the node already received a fresh identity in this run.
    pub fn adopt_observed(&mut self, node: &str, public: PublicKey) {
        match self.identities.get(node) {
            Some(Identity::Fresh { .. }) => {
                log::warn!("not adopting observed key for '{node}': a fresh key was already issued");
            }
            _ => {
                log::debug!("adopting observed identity {public:?} for '{node}'");
                self.identities
                    .insert(node.to_string(), Identity::Existing(public));
            }
        }
    }

    /// Record whether the preshared key for `edge` is already deployed.
    pub fn adopt_observed_preshared(&mut self, edge: Edge, present: bool) {
        match (present, self.preshared.get(&edge)) {
            (_, Some(Preshared::Fresh(_))) => {}
            (true, _) => {
                self.preshared.insert(edge, Preshared::Existing);
            }
            (false, _) => {
                self.preshared.remove(&edge);
            }
        }
    }

    /// Identity for `node`, generated on first request unless adopted.
    pub fn identity_for(&mut self, node: &str) -> &Identity {
        let generator = self.generator;
        self.identities.entry(node.to_string()).or_insert_with(|| {
            let (private, public) = generator.generate_keypair();
            log::debug!("generated identity {public:?} for '{node}'");
            Identity::Fresh { public, private }
        })
    }

    /// Identity for `node` if one was adopted or generated already.
    pub fn known_identity(&self, node: &str) -> Option<&Identity> {
        self.identities.get(node)
    }

    /// Preshared key for `edge`, generated on first request unless adopted.
    pub fn preshared_for(&mut self, edge: Edge) -> &Preshared {
        let generator = self.generator;
        self.preshared
            .entry(edge)
            .or_insert_with(|| Preshared::Fresh(generator.generate_preshared()))
    }

    /// Number of identities generated in this run.
    pub fn fresh_identities(&self) -> usize {
        self.identities.values().filter(|i| i.is_fresh()).count()
    }
}

impl fmt::Debug for KeyManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("identities", &self.identities.len())
            .field("preshared", &self.preshared.len())
            .finish()
    }
}
