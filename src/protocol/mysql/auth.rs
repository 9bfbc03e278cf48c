//! MySQL authentication
//!
//! Challenge generation and the `mysql_native_password` scheme.
//!
//! Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_authentication_methods_native_password_authentication.html>

use rand::Rng;
use sha1::{Digest, Sha1};

/// Lowest byte used in challenge fragments ('!')
const CHALLENGE_MIN: u8 = 0x21;
/// Highest byte used in challenge fragments ('~')
const CHALLENGE_MAX: u8 = 0x7E;

/// Per-connection challenge sent in the greeting (8 + 12 printable bytes)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Challenge {
    /// First fragment, sent before the filler byte
    pub part_1: [u8; 8],
    /// Second fragment, sent after the reserved bytes
    pub part_2: [u8; 12],
}

impl Challenge {
    /// Generate a fresh challenge from the thread-local CSPRNG.
    ///
    /// Bytes are printable ASCII so no fragment ever contains a NUL.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut part_1 = [0u8; 8];
        let mut part_2 = [0u8; 12];
        for byte in part_1.iter_mut().chain(part_2.iter_mut()) {
            *byte = rng.gen_range(CHALLENGE_MIN..=CHALLENGE_MAX);
        }
        Self { part_1, part_2 }
    }

    /// Build a challenge from known fragments
    pub fn from_parts(part_1: [u8; 8], part_2: [u8; 12]) -> Self {
        Self { part_1, part_2 }
    }

    /// The 20-byte concatenation `part_1 + part_2`
    pub fn as_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        out[..8].copy_from_slice(&self.part_1);
        out[8..].copy_from_slice(&self.part_2);
        out
    }
}

impl std::fmt::Debug for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Challenge([REDACTED])")
    }
}

/// `SHA1(SHA1(password))`, the value a privilege store keeps instead of the password
pub fn native_password_stage2(password: &[u8]) -> [u8; 20] {
    let stage1 = Sha1::digest(password);
    Sha1::digest(stage1).into()
}

/// Compute the auth response for mysql_native_password
///
/// Algorithm:
/// ```text
/// SHA1( password ) XOR SHA1( challenge + SHA1( SHA1( password ) ) )
/// ```
///
/// An empty password produces an empty response.
pub fn compute_native_password(password: &str, challenge: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(challenge);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Verify a client auth response against a stored `SHA1(SHA1(password))`.
///
/// Recovers `SHA1(password)` from the response and checks that hashing it
/// again yields the stored value.
pub fn verify_native_password(auth_response: &[u8], challenge: &[u8], stage2: &[u8; 20]) -> bool {
    if auth_response.len() != 20 || challenge.len() != 20 {
        return false;
    }

    let mut hasher = Sha1::new();
    hasher.update(challenge);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    let recovered_stage1: Vec<u8> = auth_response
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect();

    let computed = Sha1::digest(&recovered_stage1);
    // Fold over every byte so the comparison time does not depend on the mismatch position
    computed
        .iter()
        .zip(stage2.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
