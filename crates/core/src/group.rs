//! Group identifiers and key material.
//!
//! Everything a V2 group needs locally is derived from its master key. The
//! derivation is deterministic, so results may be cached for as long as the key
//! is known.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DomainError;

const MASTER_KEY_LEN: usize = 32;
const SECRET_LABEL: &[u8] = b"courier/group/secret-params/v1";
const IDENTIFIER_LABEL: &[u8] = b"courier/group/identifier/v1";

/// Root secret shared by all members of a V2 group.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupMasterKey([u8; MASTER_KEY_LEN]);

impl GroupMasterKey {
    pub const fn new(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, DomainError> {
        let bytes: [u8; MASTER_KEY_LEN] = bytes.try_into().map_err(|_| {
            DomainError::invalid_group_key(format!(
                "expected {MASTER_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.0
    }
}

// Never print key material.
impl core::fmt::Debug for GroupMasterKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("GroupMasterKey(..)")
    }
}

/// Public half of the group parameters; carries the group identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupPublicParams {
    group_identifier: [u8; 32],
}

impl GroupPublicParams {
    pub fn group_identifier(&self) -> [u8; 32] {
        self.group_identifier
    }
}

/// Secret group parameters derived from a [`GroupMasterKey`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct GroupSecretParams {
    secret: [u8; 32],
    public: GroupPublicParams,
}

impl GroupSecretParams {
    /// Derive the parameters for `key`. Total over well-formed keys.
    pub fn derive_from_master_key(key: &GroupMasterKey) -> Self {
        let secret: [u8; 32] = Sha256::new()
            .chain_update(SECRET_LABEL)
            .chain_update(key.as_bytes())
            .finalize()
            .into();
        let group_identifier: [u8; 32] = Sha256::new()
            .chain_update(IDENTIFIER_LABEL)
            .chain_update(secret)
            .finalize()
            .into();

        Self {
            secret,
            public: GroupPublicParams { group_identifier },
        }
    }

    pub fn public_params(&self) -> GroupPublicParams {
        self.public
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }
}

impl core::fmt::Debug for GroupSecretParams {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GroupSecretParams")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Identifier of a group conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupId {
    /// Legacy groups; cannot carry admin actions.
    V1([u8; 16]),
    /// Groups whose state is derived from a [`GroupMasterKey`].
    V2([u8; 32]),
}

impl GroupId {
    pub fn v2(group_identifier: [u8; 32]) -> Self {
        Self::V2(group_identifier)
    }

    /// The V2 id derived from `key`.
    pub fn v2_from_master_key(key: &GroupMasterKey) -> Self {
        Self::v2(
            GroupSecretParams::derive_from_master_key(key)
                .public_params()
                .group_identifier(),
        )
    }

    pub fn is_v2(&self) -> bool {
        matches!(self, GroupId::V2(_))
    }
}

impl core::fmt::Display for GroupId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            GroupId::V1(bytes) => write!(f, "__textsecure_group__!{}", hex::encode(bytes)),
            GroupId::V2(bytes) => write!(f, "__signal_group__v2__!{}", hex::encode(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn master_key_requires_32_bytes() {
        assert!(GroupMasterKey::from_slice(&[0u8; 32]).is_ok());
        let err = GroupMasterKey::from_slice(&[0u8; 31]).unwrap_err();
        assert!(matches!(err, DomainError::InvalidGroupKey(_)));
    }

    #[test]
    fn distinct_keys_give_distinct_ids() {
        let a = GroupId::v2_from_master_key(&GroupMasterKey::new([1; 32]));
        let b = GroupId::v2_from_master_key(&GroupMasterKey::new([2; 32]));
        assert_ne!(a, b);
        assert!(a.is_v2());
    }

    #[test]
    fn debug_output_hides_key_material() {
        let key = GroupMasterKey::new([0xAB; 32]);
        assert_eq!(format!("{key:?}"), "GroupMasterKey(..)");
        let params = GroupSecretParams::derive_from_master_key(&key);
        assert!(!format!("{params:?}").contains("secret:"));
    }

    proptest! {
        #[test]
        fn derivation_is_deterministic(bytes in prop::array::uniform32(any::<u8>())) {
            let key = GroupMasterKey::new(bytes);
            let first = GroupSecretParams::derive_from_master_key(&key);
            let second = GroupSecretParams::derive_from_master_key(&key);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(
                GroupId::v2(first.public_params().group_identifier()),
                GroupId::v2_from_master_key(&key)
            );
        }
    }
}
