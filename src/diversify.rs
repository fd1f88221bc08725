//! UID-bound key diversification.
//!
//! Deployments hold one master key per customer; the keys programmed into
//! an individual tag are derived from it. The meta-read key is shared by
//! all tags of a customer, while the file-read key is additionally bound to
//! the tag UID, so that extracting one tag's key compromises only that tag.


use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypt::cmac::aes_cmac_fixed;


type HmacSha256 = Hmac<Sha256>;

const PICC_DATA_KEY_LABEL: &[u8] = b"PICCDataKey";
const SLOT_MASTER_KEY_LABEL: &[u8] = b"SlotMasterKey";
const DIV_BASE_KEY_LABEL: &[u8] = b"DivBaseKey";

const MASTER_KEY_MIN_LEN: usize = 16;
const MASTER_KEY_MAX_LEN: usize = 32;


#[derive(Debug)]
pub enum Error {
    MasterKeyLength { obtained: usize },
    UidLength { obtained: usize },
    KeyNumber { obtained: u8 },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::MasterKeyLength { obtained }
                => write!(f, "master key has unsupported length {}", obtained),
            Self::UidLength { obtained }
                => write!(f, "UID has unsupported length {}", obtained),
            Self::KeyNumber { obtained }
                => write!(f, "key number {} is not allowed", obtained),
        }
    }
}
impl std::error::Error for Error {
}


fn check_master_key(master_key: &[u8]) -> Result<(), Error> {
    if master_key.len() < MASTER_KEY_MIN_LEN || master_key.len() > MASTER_KEY_MAX_LEN {
        return Err(Error::MasterKeyLength { obtained: master_key.len() });
    }
    Ok(())
}

/// Whether the master key is the all-zero factory key.
fn is_factory_key(master_key: &[u8]) -> bool {
    master_key.len() == 16 && bool::from(master_key.ct_eq(&[0u8; 16]))
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).unwrap();
    mac.update(msg);
    Zeroizing::new(mac.finalize().into_bytes().into())
}

fn truncate16(digest: &[u8; 32]) -> Zeroizing<[u8; 16]> {
    let mut key = Zeroizing::new([0u8; 16]);
    key.copy_from_slice(&digest[0..16]);
    key
}

/// Derives the key shared by all tags of one master key.
///
/// This is the SDM meta-read key (slot 1); `key_number` must be 1. The
/// all-zero 16-byte master key passes through unchanged so that factory
/// provisioning flows keep working.
pub fn derive_undiversified_key(master_key: &[u8], key_number: u8) -> Result<Zeroizing<[u8; 16]>, Error> {
    check_master_key(master_key)?;
    if key_number != 1 {
        return Err(Error::KeyNumber { obtained: key_number });
    }
    if is_factory_key(master_key) {
        return Ok(Zeroizing::new([0u8; 16]));
    }
    Ok(truncate16(&hmac_sha256(master_key, PICC_DATA_KEY_LABEL)))
}

/// Derives a key bound to one tag's UID.
///
/// `key_number` selects the key slot (1 or 2; slot 2 is the SDM file-read
/// key). The UID must be 7 bytes. The derivation chains HMAC-SHA-256 over
/// the fixed slot and base labels with a final AES-CMAC step; the all-zero
/// 16-byte master key passes through unchanged.
pub fn derive_tag_key(master_key: &[u8], uid: &[u8], key_number: u8) -> Result<Zeroizing<[u8; 16]>, Error> {
    check_master_key(master_key)?;
    if uid.len() != 7 {
        return Err(Error::UidLength { obtained: uid.len() });
    }
    if key_number != 1 && key_number != 2 {
        return Err(Error::KeyNumber { obtained: key_number });
    }
    if is_factory_key(master_key) {
        return Ok(Zeroizing::new([0u8; 16]));
    }

    let mut slot_label = Zeroizing::new(Vec::with_capacity(SLOT_MASTER_KEY_LABEL.len() + 1));
    slot_label.extend_from_slice(SLOT_MASTER_KEY_LABEL);
    slot_label.push(key_number);
    let cmac_key = truncate16(&hmac_sha256(master_key, &slot_label));

    let div_base = hmac_sha256(master_key, DIV_BASE_KEY_LABEL);
    let uid_bound = truncate16(&hmac_sha256(div_base.as_slice(), uid));

    let mut diversification_input = Zeroizing::new([0u8; 17]);
    diversification_input[0] = 0x01;
    diversification_input[1..].copy_from_slice(uid_bound.as_slice());
    Ok(Zeroizing::new(aes_cmac_fixed(&cmac_key, diversification_input.as_slice())))
}


#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::{derive_tag_key, derive_undiversified_key, Error};

    const MASTER_KEY: [u8; 32] = hex!("47BBB68AFA73F31310BEEFCE5DDA692DBAD671A03FEAD5A9BBDBCF3CD6D4C521");
    const UID: [u8; 7] = hex!("04C24EDA926980");

    #[test]
    fn test_undiversified_key() {
        let key = derive_undiversified_key(&MASTER_KEY, 1).unwrap();
        assert_eq!(*key, hex!("C3B653D8484D82FD9D5DC48840E1F94E"));
    }

    #[test]
    fn test_tag_keys_differ_per_slot() {
        let key1 = derive_tag_key(&MASTER_KEY, &UID, 1).unwrap();
        let key2 = derive_tag_key(&MASTER_KEY, &UID, 2).unwrap();
        assert_eq!(*key1, hex!("2A836506938848CBEDC523B96F291472"));
        assert_eq!(*key2, hex!("1FD0D360CCF906DF902CC8404C7CE5AA"));
    }

    #[test]
    fn test_factory_key_passthrough() {
        let zero = [0u8; 16];
        assert_eq!(*derive_undiversified_key(&zero, 1).unwrap(), zero);
        assert_eq!(*derive_tag_key(&zero, &UID, 1).unwrap(), zero);
        assert_eq!(*derive_tag_key(&zero, &UID, 2).unwrap(), zero);
        // a zero key of a different width is not the factory key
        let zero24 = [0u8; 24];
        assert_ne!(*derive_undiversified_key(&zero24, 1).unwrap(), zero);
    }

    #[test]
    fn test_argument_validation() {
        assert!(matches!(
            derive_undiversified_key(&[0u8; 15], 1),
            Err(Error::MasterKeyLength { obtained: 15 }),
        ));
        assert!(matches!(
            derive_undiversified_key(&[0u8; 33], 1),
            Err(Error::MasterKeyLength { obtained: 33 }),
        ));
        assert!(matches!(
            derive_undiversified_key(&[0u8; 16], 2),
            Err(Error::KeyNumber { obtained: 2 }),
        ));
        assert!(matches!(
            derive_tag_key(&[0u8; 16], &[0u8; 6], 1),
            Err(Error::UidLength { obtained: 6 }),
        ));
        assert!(matches!(
            derive_tag_key(&[0u8; 16], &UID, 3),
            Err(Error::KeyNumber { obtained: 3 }),
        ));
        // validation happens before the factory passthrough
        assert!(matches!(
            derive_tag_key(&[0u8; 16], &UID, 0),
            Err(Error::KeyNumber { obtained: 0 }),
        ));
    }
}
