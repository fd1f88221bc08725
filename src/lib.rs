//! Cryptographic core for NTAG 424 DNA Secure Dynamic Messaging.
//!
//! Each tap of an NTAG 424 DNA tag produces a SUN (Secure Unique NFC)
//! message: an encrypted PICC data blob, an optional encrypted file payload
//! and a truncated authentication tag. [`sun::decrypt_sun_message`] and
//! [`sun::validate_plain_sun`] turn such a message back into the tag UID,
//! its monotonic read counter and the plaintext file bytes, provided the
//! message authenticates.
//!
//! Both primitive families of the chip are supported: plain AES-128
//! (CBC/CMAC) and the Leakage Resilient Primitive of NXP AN12304
//! ([`crypt::lrp`]). [`diversify`] derives the per-tag keys from a customer
//! master key.
//!
//! The crate performs no I/O and keeps no global state; callers bring their
//! own URL parsing, hex decoding and replay-counter storage.

pub mod crypt;
pub mod diversify;
pub mod sun;
