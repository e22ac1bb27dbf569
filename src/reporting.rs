use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::common::{
    crypto::{PublicKey, RsaKeyPair},
    decimal,
    error::ConsensusError,
    minimal_bytes,
};

/*
    Reports for the Procurement Officer are sealed with textbook RSA under the
    officer's key: the plaintext bytes are read as one big-endian integer m and
    c = m^e mod n. There is no chunking. A plaintext at or above n is reduced
    mod n first, which loses information; the envelope flags when that
    happened.
*/

pub struct OfficerChannel {
    keypair: RsaKeyPair,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SealedEnvelope {
    #[serde(with = "decimal")]
    pub ciphertext: BigUint,
    pub reduced: bool,
}

/// What the decode chain made of a decrypted integer.
#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(tag = "format", content = "decrypted", rename_all = "snake_case")]
pub enum DecryptedPayload {
    Json(serde_json::Value),
    Text(String),
    JsonBytes(serde_json::Value),
    Hex(String),
}

impl OfficerChannel {
    pub fn new(keypair: RsaKeyPair) -> Self {
        OfficerChannel { keypair }
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keypair.public_key()
    }

    pub fn seal(&self, plaintext: &[u8]) -> SealedEnvelope {
        let n = &self.public_key().n;
        let mut m = BigUint::from_bytes_be(plaintext);
        let reduced = &m >= n;
        if reduced {
            warn!(bytes = plaintext.len(), "Report exceeds the officer modulus, reducing");
            m %= n;
        }
        SealedEnvelope {
            ciphertext: self.public_key().encrypt(&m),
            reduced,
        }
    }

    pub fn seal_json<T: Serialize>(&self, report: &T) -> Result<SealedEnvelope, ConsensusError> {
        let json = serde_json::to_vec(report)
            .map_err(|e| ConsensusError::InvalidInput(format!("unserializable report: {e}")))?;
        Ok(self.seal(&json))
    }

    pub fn open(&self, ciphertext: &BigUint) -> DecryptedPayload {
        let n = &self.public_key().n;
        let m = if ciphertext >= n {
            self.keypair.decrypt(&(ciphertext % n))
        } else {
            self.keypair.decrypt(ciphertext)
        };
        decode(minimal_bytes(&m))
    }

    /// Opens a ciphertext given as a decimal string.
    pub fn open_decimal(&self, ciphertext: &str) -> Result<DecryptedPayload, ConsensusError> {
        let c = decimal::parse(ciphertext.trim()).map_err(ConsensusError::InvalidInput)?;
        Ok(self.open(&c))
    }
}

pub(crate) fn decode(bytes: Vec<u8>) -> DecryptedPayload {
    match String::from_utf8(bytes) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(value) => DecryptedPayload::Json(value),
            Err(_) => DecryptedPayload::Text(text),
        },
        Err(e) => {
            let bytes = e.into_bytes();
            match serde_json::from_slice(&bytes) {
                Ok(value) => DecryptedPayload::JsonBytes(value),
                Err(_) => {
                    debug!(bytes = bytes.len(), "Decrypted payload is not text");
                    DecryptedPayload::Hex(hex::encode(bytes))
                }
            }
        }
    }
}
