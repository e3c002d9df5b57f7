use std::fmt::Display;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Content digest of an extension payload, in subresource-integrity form
/// (`sha256-<base64>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Integrity {
    pub algorithm: IntegrityAlgorithm,
    pub digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrityAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityParseError {
    #[error("invalid integrity format, expected 'algorithm-digest'")]
    MissingSeparator,

    #[error("unsupported integrity algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("integrity digest is not valid base64")]
    InvalidDigest,
}

impl Integrity {
    /// Compute the digest of `data` with the given algorithm.
    pub fn compute(algorithm: IntegrityAlgorithm, data: &[u8]) -> Self {
        Self {
            digest: algorithm.calculate(data),
            algorithm,
        }
    }

    /// Shorthand for [`Integrity::compute`] with SHA-256.
    pub fn sha256(data: &[u8]) -> Self {
        Self::compute(IntegrityAlgorithm::Sha256, data)
    }

    /// Recompute the digest of `data` and compare it with this one.
    pub fn verify(&self, data: &[u8]) -> bool {
        self.algorithm.calculate(data) == self.digest
    }
}

impl IntegrityAlgorithm {
    /// Base64-encoded digest of `data`.
    pub fn calculate(&self, data: &[u8]) -> String {
        use sha2::{Digest, Sha256, Sha384, Sha512};

        match self {
            IntegrityAlgorithm::Sha256 => STANDARD.encode(Sha256::digest(data)),
            IntegrityAlgorithm::Sha384 => STANDARD.encode(Sha384::digest(data)),
            IntegrityAlgorithm::Sha512 => STANDARD.encode(Sha512::digest(data)),
        }
    }
}

impl Display for IntegrityAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityAlgorithm::Sha256 => write!(f, "sha256"),
            IntegrityAlgorithm::Sha384 => write!(f, "sha384"),
            IntegrityAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

impl FromStr for IntegrityAlgorithm {
    type Err = IntegrityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(IntegrityAlgorithm::Sha256),
            "sha384" => Ok(IntegrityAlgorithm::Sha384),
            "sha512" => Ok(IntegrityAlgorithm::Sha512),
            other => Err(IntegrityParseError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl Display for Integrity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.algorithm, self.digest)
    }
}

impl FromStr for Integrity {
    type Err = IntegrityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, digest) = s
            .trim()
            .split_once('-')
            .ok_or(IntegrityParseError::MissingSeparator)?;
        let algorithm = algorithm.parse()?;
        if STANDARD.decode(digest).is_err() {
            return Err(IntegrityParseError::InvalidDigest);
        }

        Ok(Integrity {
            algorithm,
            digest: digest.to_string(),
        })
    }
}

impl Serialize for Integrity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Integrity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        string.parse().map_err(serde::de::Error::custom)
    }
}
