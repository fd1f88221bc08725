//! AES-128 block primitives.


pub mod cmac;
pub mod lrp;


use std::fmt;

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::cipher::block_padding::NoPadding;
use aes::cipher::generic_array::GenericArray;


/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;


/// Failure of an underlying block operation.
///
/// The variants identify the violated contract for log triage via `Debug`;
/// the `Display` rendering is deliberately uniform so that callers relaying
/// error text towards an attacker do not reveal which internal step failed.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CryptoError {
    KeyLength,
    DataLength,
    CounterLength,
    UpdateIndex,
    Padding,
}
impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cryptographic operation failed")
    }
}
impl std::error::Error for CryptoError {
}


/// Encrypts a single 16-byte block with AES-128 in ECB mode.
pub fn encrypt_block(key: &[u8], block: &[u8]) -> Result<[u8; BLOCK_SIZE], CryptoError> {
    let block: &[u8; BLOCK_SIZE] = block.try_into().map_err(|_| CryptoError::DataLength)?;
    let key: &[u8; BLOCK_SIZE] = key.try_into().map_err(|_| CryptoError::KeyLength)?;
    Ok(encrypt_block_fixed(key, block))
}

/// Decrypts a single 16-byte block with AES-128 in ECB mode.
pub fn decrypt_block(key: &[u8], block: &[u8]) -> Result<[u8; BLOCK_SIZE], CryptoError> {
    let block: &[u8; BLOCK_SIZE] = block.try_into().map_err(|_| CryptoError::DataLength)?;
    let key: &[u8; BLOCK_SIZE] = key.try_into().map_err(|_| CryptoError::KeyLength)?;
    Ok(decrypt_block_fixed(key, block))
}

pub(crate) fn encrypt_block_fixed(key: &[u8; BLOCK_SIZE], block: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);
    buf.into()
}

pub(crate) fn decrypt_block_fixed(key: &[u8; BLOCK_SIZE], block: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut buf);
    buf.into()
}

/// Encrypts data with AES-128-CBC without padding.
///
/// `data` must be a non-empty multiple of [`BLOCK_SIZE`].
pub fn encrypt_cbc(key: &[u8], iv: &[u8; BLOCK_SIZE], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::DataLength);
    }
    let encryptor = Aes128CbcEnc::new_from_slices(key, iv).map_err(|_| CryptoError::KeyLength)?;
    let mut buf = data.to_vec();
    let data_len = buf.len();
    encryptor.encrypt_padded_mut::<NoPadding>(&mut buf, data_len).map_err(|_| CryptoError::DataLength)?;
    Ok(buf)
}

/// Decrypts data with AES-128-CBC without stripping padding.
///
/// `data` must be a non-empty multiple of [`BLOCK_SIZE`].
pub fn decrypt_cbc(key: &[u8], iv: &[u8; BLOCK_SIZE], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::DataLength);
    }
    let decryptor = Aes128CbcDec::new_from_slices(key, iv).map_err(|_| CryptoError::KeyLength)?;
    let mut buf = data.to_vec();
    decryptor.decrypt_padded_mut::<NoPadding>(&mut buf).map_err(|_| CryptoError::DataLength)?;
    Ok(buf)
}


#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::{decrypt_block, decrypt_cbc, encrypt_block, encrypt_cbc, CryptoError};

    #[test]
    fn test_ecb_fips197_vector() {
        let key = hex!("000102030405060708090A0B0C0D0E0F");
        let plain = hex!("00112233445566778899AABBCCDDEEFF");
        let cipher = encrypt_block(&key, &plain).unwrap();
        assert_eq!(cipher, hex!("69C4E0D86A7B0430D8CDB78070B4C55A"));
        assert_eq!(decrypt_block(&key, &cipher).unwrap(), plain);
    }

    #[test]
    fn test_cbc_round_trip() {
        let key = hex!("2B7E151628AED2A6ABF7158809CF4F3C");
        let iv = hex!("000102030405060708090A0B0C0D0E0F");
        let plain = hex!("
            6BC1BEE22E409F96E93D7E117393172A
            AE2D8A571E03AC9C9EB76FAC45AF8E51
        ");
        let cipher = encrypt_cbc(&key, &iv, &plain).unwrap();
        assert_eq!(cipher.len(), plain.len());
        assert_eq!(decrypt_cbc(&key, &iv, &cipher).unwrap(), plain);
    }

    #[test]
    fn test_cbc_nist_sp800_38a_vector() {
        let key = hex!("2B7E151628AED2A6ABF7158809CF4F3C");
        let iv = hex!("000102030405060708090A0B0C0D0E0F");
        let plain = hex!("6BC1BEE22E409F96E93D7E117393172A");
        let cipher = encrypt_cbc(&key, &iv, &plain).unwrap();
        assert_eq!(cipher.as_slice(), hex!("7649ABAC8119B246CEE98E9B12E9197D"));
    }

    #[test]
    fn test_length_contracts() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        assert_eq!(encrypt_cbc(&key, &iv, &[]).unwrap_err(), CryptoError::DataLength);
        assert_eq!(encrypt_cbc(&key, &iv, &[0u8; 15]).unwrap_err(), CryptoError::DataLength);
        assert_eq!(decrypt_cbc(&key, &iv, &[0u8; 17]).unwrap_err(), CryptoError::DataLength);
        assert_eq!(decrypt_cbc(&[0u8; 11], &iv, &[0u8; 16]).unwrap_err(), CryptoError::KeyLength);
        assert_eq!(encrypt_block(&key, &[0u8; 5]).unwrap_err(), CryptoError::DataLength);
        assert_eq!(encrypt_block(&[0u8; 24], &[0u8; 16]).unwrap_err(), CryptoError::KeyLength);
    }
}
