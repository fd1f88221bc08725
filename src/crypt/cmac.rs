//! AES-CMAC (NIST SP 800-38B) and the SDM tag truncation.


use aes::Aes128;
use cmac::{Cmac, Mac};

use crate::crypt::{CryptoError, BLOCK_SIZE};


/// Computes the full 16-byte AES-CMAC of `msg` under `key`.
pub fn aes_cmac(key: &[u8], msg: &[u8]) -> Result<[u8; BLOCK_SIZE], CryptoError> {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key).map_err(|_| CryptoError::KeyLength)?;
    mac.update(msg);
    Ok(mac.finalize().into_bytes().into())
}

pub(crate) fn aes_cmac_fixed(key: &[u8; BLOCK_SIZE], msg: &[u8]) -> [u8; BLOCK_SIZE] {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key).unwrap();
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

/// Truncates a full MAC to the 8-byte SDMMAC by taking the odd-indexed bytes.
///
/// NTAG 424 DNA transmits bytes 1, 3, 5, 7, 9, 11, 13 and 15 of the full
/// MAC; this holds for both the AES and the LRP primitive family.
pub fn truncate_mac(full_mac: &[u8; BLOCK_SIZE]) -> [u8; 8] {
    [
        full_mac[1],
        full_mac[3],
        full_mac[5],
        full_mac[7],
        full_mac[9],
        full_mac[11],
        full_mac[13],
        full_mac[15],
    ]
}
