//! Deterministic CREATE2 address derivation.
//!
//! `address = keccak256(0xff ++ deployer ++ salt ++ keccak256(init_code))[12..]`
//!
//! The result depends only on its three inputs, never on chain state, so the
//! same artifact deployed with the same salt lands at the same address on every
//! network that shares a creator.

use alloy_core::primitives::{Address, B256, keccak256};
use derive_more::{Deref, From};
use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// Width of a CREATE2 salt in bytes.
pub const SALT_LENGTH: usize = 32;

/// A validated, fixed-width CREATE2 salt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Deref, From)]
#[serde(transparent)]
pub struct Salt(B256);

impl Salt {
    /// The all-zero salt.
    pub const ZERO: Salt = Salt(B256::ZERO);

    /// Build a salt from exactly [`SALT_LENGTH`] bytes.
    ///
    /// The calculator never pads or truncates; callers that accept shorter
    /// human input should go through [`parse_salt`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AddressError> {
        if bytes.len() != SALT_LENGTH {
            return Err(AddressError::InvalidSaltLength {
                expected: SALT_LENGTH,
                actual: bytes.len(),
            });
        }
        Ok(Self(B256::from_slice(bytes)))
    }

    /// Lowercase `0x`-prefixed hex, as used in ledger keys.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

/// Parse a user-supplied salt.
///
/// Accepts an optional `0x` prefix. Values shorter than 32 bytes are
/// left-padded with zeroes; longer values are rejected.
pub fn parse_salt(input: &str) -> Result<Salt, AddressError> {
    let digits = input.trim().trim_start_matches("0x");
    let digits = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };

    let bytes = hex::decode(&digits).map_err(|e| AddressError::InvalidSaltHex(e.to_string()))?;
    if bytes.len() > SALT_LENGTH {
        return Err(AddressError::InvalidSaltLength {
            expected: SALT_LENGTH,
            actual: bytes.len(),
        });
    }

    let mut padded = [0u8; SALT_LENGTH];
    padded[SALT_LENGTH - bytes.len()..].copy_from_slice(&bytes);
    Ok(Salt(B256::from(padded)))
}

/// Compute the CREATE2 address for `init_code` deployed by `deployer` with `salt`.
///
/// `salt` must be exactly 32 bytes. Empty init code is allowed and yields a
/// well-defined address.
pub fn compute_address(
    deployer: Address,
    salt: &[u8],
    init_code: &[u8],
) -> Result<Address, AddressError> {
    let salt = Salt::from_slice(salt)?;
    Ok(create2_address(deployer, &salt, init_code))
}

/// Infallible variant of [`compute_address`] for an already validated salt.
pub fn create2_address(deployer: Address, salt: &Salt, init_code: &[u8]) -> Address {
    let code_hash = keccak256(init_code);

    let mut preimage = [0u8; 1 + 20 + 32 + 32];
    preimage[0] = 0xff;
    preimage[1..21].copy_from_slice(deployer.as_slice());
    preimage[21..53].copy_from_slice(salt.as_slice());
    preimage[53..85].copy_from_slice(code_hash.as_slice());

    Address::from_word(keccak256(preimage))
}
