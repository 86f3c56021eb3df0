//! Protocols built on top of the framework
//!
//! * [xor]: every party contributes a random value, and everyone outputs XOR of all
//!   contributions. The minimal protocol exercising the whole round lifecycle.
//! * [coin_flip]: commit-reveal coin flipping, requires `coin-flip` feature. Demonstrates
//!   state carried over several rounds and failures attributed to misbehaving parties.

#[cfg(feature = "coin-flip")]
pub mod coin_flip;
pub mod xor;

/// XORs `value` into `acc`
///
/// Extra bytes of the longer slice are ignored.
pub(crate) fn xor_into(acc: &mut [u8], value: &[u8]) {
    acc.iter_mut().zip(value).for_each(|(a, v)| *a ^= v);
}
