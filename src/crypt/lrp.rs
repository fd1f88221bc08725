//! The Leakage Resilient Primitive (NXP AN12304).
//!
//! LRP is a deterministic construction on top of AES-ECB. A secret key is
//! expanded into a table of sixteen plaintexts and four updated keys; the
//! core evaluation walks the input nibble by nibble, re-keying AES at every
//! step. On top of the evaluation sit LRICB, a counter-driven block cipher
//! mode, and an LRP-flavoured CMAC.
//!
//! NTAG 424 DNA tags configured for LRP protect their SUN messages with this
//! construction instead of plain AES; see [`crate::sun`].


use block_padding::{Iso7816, RawPadding};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};
use zeroize::Zeroizing;

use crate::crypt::{self, CryptoError, BLOCK_SIZE};


const SEED_55: [u8; BLOCK_SIZE] = [0x55; BLOCK_SIZE];
const SEED_AA: [u8; BLOCK_SIZE] = [0xAA; BLOCK_SIZE];

/// Number of entries in the plaintext table, one per nibble value.
pub const PLAINTEXT_COUNT: usize = 16;

/// Number of updated keys derived from one LRP key.
pub const UPDATED_KEY_COUNT: usize = 4;


/// Derives the sixteen-entry plaintext table from an LRP key.
///
/// The table depends only on the key and may be shared between the update
/// modes of the same key.
pub fn generate_plaintexts(key: &[u8]) -> Result<[[u8; BLOCK_SIZE]; PLAINTEXT_COUNT], CryptoError> {
    let key: &[u8; BLOCK_SIZE] = key.try_into().map_err(|_| CryptoError::KeyLength)?;
    let mut h = Zeroizing::new(crypt::encrypt_block_fixed(key, &SEED_55));
    let mut table = [[0u8; BLOCK_SIZE]; PLAINTEXT_COUNT];
    for entry in table.iter_mut() {
        *entry = crypt::encrypt_block_fixed(&h, &SEED_AA);
        *h = crypt::encrypt_block_fixed(&h, &SEED_55);
    }
    Ok(table)
}

/// Derives the four updated keys from an LRP key.
pub fn generate_updated_keys(key: &[u8]) -> Result<[[u8; BLOCK_SIZE]; UPDATED_KEY_COUNT], CryptoError> {
    let key: &[u8; BLOCK_SIZE] = key.try_into().map_err(|_| CryptoError::KeyLength)?;
    let mut h = Zeroizing::new(crypt::encrypt_block_fixed(key, &SEED_AA));
    let mut keys = [[0u8; BLOCK_SIZE]; UPDATED_KEY_COUNT];
    for entry in keys.iter_mut() {
        *entry = crypt::encrypt_block_fixed(&h, &SEED_AA);
        *h = crypt::encrypt_block_fixed(&h, &SEED_55);
    }
    Ok(keys)
}

fn eval_lrp(
    plaintexts: &[[u8; BLOCK_SIZE]; PLAINTEXT_COUNT],
    updated_key: &[u8; BLOCK_SIZE],
    input: &[u8],
    finalize: bool,
) -> [u8; BLOCK_SIZE] {
    let mut y = *updated_key;
    for byte in input {
        // high nibble first
        for nibble in [byte >> 4, byte & 0x0F] {
            y = crypt::encrypt_block_fixed(&y, &plaintexts[usize::from(nibble)]);
        }
    }
    if finalize {
        y = crypt::encrypt_block_fixed(&y, &[0u8; BLOCK_SIZE]);
    }
    y
}

/// Doubling in GF(2^128) with the x^128 + x^7 + x^2 + x + 1 reduction
/// polynomial, most significant bit first.
fn gf_double(block: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let mut out = [0u8; BLOCK_SIZE];
    let mut carry = 0u8;
    for i in (0..BLOCK_SIZE).rev() {
        out[i] = (block[i] << 1) | carry;
        carry = block[i] >> 7;
    }
    // branch-free reduction; carry is the shifted-out bit
    out[BLOCK_SIZE - 1] ^= 0x87 & carry.wrapping_neg();
    out
}

/// Locates the ISO/IEC 9797-1 method-2 padding in the final block of `buf`
/// and returns the unpadded length.
///
/// The whole final block is scanned regardless of where the padding starts,
/// so the running time does not depend on the padding's validity or length.
fn unpadded_len(buf: &[u8]) -> Result<usize, CryptoError> {
    debug_assert!(!buf.is_empty() && buf.len() % BLOCK_SIZE == 0);
    let final_block = &buf[buf.len() - BLOCK_SIZE..];
    let mut pad_len = 0u8;
    let mut found = Choice::from(0u8);
    let mut invalid = Choice::from(0u8);
    for b in final_block.iter().rev() {
        let is_marker = b.ct_eq(&0x80);
        let is_zero = b.ct_eq(&0x00);
        // padding bytes are the ones scanned before the marker turns up;
        // count them while the marker has not been seen
        pad_len = u8::conditional_select(&pad_len, &(pad_len + 1), !found);
        invalid |= !found & !is_marker & !is_zero;
        found |= is_marker;
    }
    invalid |= !found;
    if bool::from(invalid) {
        return Err(CryptoError::Padding);
    }
    Ok(buf.len() - usize::from(pad_len))
}

fn iso_pad(data: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; (data.len() / BLOCK_SIZE + 1) * BLOCK_SIZE];
    buf[..data.len()].copy_from_slice(data);
    Iso7816::raw_pad(&mut buf, data.len());
    buf
}


/// An LRP cipher instance.
///
/// The instance owns the plaintext table, the updated key selected by the
/// update index, and the LRICB block counter. The counter width is variable
/// (1 to 16 bytes); the SUN protocol uses 8-byte counters seeded from the
/// PICC random and 6-byte counters seeded from the read counter. It is not
/// safe to share one instance across threads.
#[derive(Debug)]
pub struct LrpCipher {
    plaintexts: Zeroizing<[[u8; BLOCK_SIZE]; PLAINTEXT_COUNT]>,
    updated_key: Zeroizing<[u8; BLOCK_SIZE]>,
    counter: Vec<u8>,
    pad: bool,
}
impl LrpCipher {
    /// Creates an instance with an all-zero 16-byte counter and message
    /// padding enabled.
    pub fn new(key: &[u8], update_index: usize) -> Result<Self, CryptoError> {
        Self::with_counter(key, update_index, &[0u8; BLOCK_SIZE], true)
    }

    /// Creates an instance with an explicit initial counter.
    ///
    /// `update_index` selects one of the four updated keys. `counter` must
    /// be 1 to 16 bytes long; increments wrap within that width. With `pad`
    /// set, [`Self::encrypt`] applies ISO/IEC 9797-1 method-2 padding and
    /// [`Self::decrypt`] strips it; otherwise message lengths must already
    /// be a non-zero multiple of the block size.
    pub fn with_counter(key: &[u8], update_index: usize, counter: &[u8], pad: bool) -> Result<Self, CryptoError> {
        if counter.is_empty() || counter.len() > BLOCK_SIZE {
            return Err(CryptoError::CounterLength);
        }
        let updated_keys = Zeroizing::new(generate_updated_keys(key)?);
        let updated_key = updated_keys.get(update_index).ok_or(CryptoError::UpdateIndex)?;
        Ok(Self {
            plaintexts: Zeroizing::new(generate_plaintexts(key)?),
            updated_key: Zeroizing::new(*updated_key),
            counter: counter.to_vec(),
            pad,
        })
    }

    /// The current counter value.
    pub fn counter(&self) -> &[u8] {
        &self.counter
    }

    /// The LRP evaluation: walks `input` one nibble at a time, high nibble
    /// of each byte first, re-keying AES at every step.
    pub fn eval(&self, input: &[u8], finalize: bool) -> [u8; BLOCK_SIZE] {
        eval_lrp(&self.plaintexts, &self.updated_key, input, finalize)
    }

    fn increment_counter(&mut self) {
        for b in self.counter.iter_mut().rev() {
            if *b == 0xFF {
                *b = 0x00;
                // carry; keep going
            } else {
                *b += 1;
                break;
            }
        }
    }

    fn apply_blocks(&mut self, buf: &mut [u8], encrypt: bool) {
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            let y = self.eval(&self.counter, true);
            let block: &mut [u8; BLOCK_SIZE] = block.try_into().unwrap();
            *block = if encrypt {
                crypt::encrypt_block_fixed(&y, block)
            } else {
                crypt::decrypt_block_fixed(&y, block)
            };
            self.increment_counter();
        }
    }

    /// Encrypts `plaintext` in LRICB mode, advancing the counter one step
    /// per block.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if plaintext.is_empty() {
            return Err(CryptoError::DataLength);
        }
        let mut buf = if self.pad {
            iso_pad(plaintext)
        } else {
            if plaintext.len() % BLOCK_SIZE != 0 {
                return Err(CryptoError::DataLength);
            }
            plaintext.to_vec()
        };
        self.apply_blocks(&mut buf, true);
        Ok(buf)
    }

    /// Decrypts `ciphertext` in LRICB mode, advancing the counter one step
    /// per block.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::DataLength);
        }
        let mut buf = ciphertext.to_vec();
        self.apply_blocks(&mut buf, false);
        if self.pad {
            let len = unpadded_len(&buf)?;
            buf.truncate(len);
        }
        Ok(buf)
    }

    /// Computes the 16-byte LRP-CMAC of `msg`.
    ///
    /// Structurally NIST SP 800-38B with the block cipher replaced by the
    /// finalized LRP evaluation; the subkeys come from the evaluation of an
    /// all-zero block, doubled in GF(2^128). The counter is not involved.
    pub fn cmac(&self, msg: &[u8]) -> [u8; BLOCK_SIZE] {
        let k0 = Zeroizing::new(self.eval(&[0u8; BLOCK_SIZE], true));
        let k1 = Zeroizing::new(gf_double(&k0));
        let k2 = Zeroizing::new(gf_double(&k1));

        let full_final_block = !msg.is_empty() && msg.len() % BLOCK_SIZE == 0;
        let (buf, last_key) = if full_final_block {
            (msg.to_vec(), k1)
        } else {
            (iso_pad(msg), k2)
        };

        let block_count = buf.len() / BLOCK_SIZE;
        let mut y = [0u8; BLOCK_SIZE];
        for (i, block) in buf.chunks_exact(BLOCK_SIZE).enumerate() {
            let mut x = [0u8; BLOCK_SIZE];
            for (xb, (yb, bb)) in x.iter_mut().zip(y.iter().zip(block.iter())) {
                *xb = yb ^ bb;
            }
            if i == block_count - 1 {
                for (xb, kb) in x.iter_mut().zip(last_key.iter()) {
                    *xb ^= kb;
                }
            }
            y = self.eval(&x, true);
        }
        y
    }
}
