//! Stream cipher used by the legacy client to seal assets and databases
//! shipped inside update packages.
//!
//! Each sealed file starts with a 16-byte header:
//!
//! | bytes     | meaning                                             |
//! |-----------|-----------------------------------------------------|
//! | `0..3`    | complement of `MD5("Hello" + basename)[4..7]`       |
//! | `6`       | LCG table selector (version 2)                      |
//! | `7`       | cipher version (`0`, `1` or `2`)                    |
//! | `10..12`  | big-endian key index (versions 0 and 1)             |
//!
//! The keystream is a 32-bit LCG; every ciphertext byte is XORed with one
//! byte of the running register before the register is advanced.

use md5::{Digest, Md5};

use crate::error::CipherError;

/// Prefix hashed in front of the file name.
pub const NAME_PREFIX: &[u8] = b"Hello";
/// Size of the header that precedes the ciphertext.
pub const HEADER_SIZE: usize = 16;

/// Parameters of one linear congruential generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LcgParams {
    pub a: u32,
    pub c: u32,
    pub shift: u32,
}

impl LcgParams {
    const fn new(a: u32, c: u32, shift: u32) -> Self {
        Self { a, c, shift }
    }

    #[inline]
    fn next(&self, x: u32) -> u32 {
        x.wrapping_mul(self.a).wrapping_add(self.c)
    }
}

/// LCG tables selectable by version 2 headers.
pub const LCG_TABLES: [LcgParams; 4] = [
    LcgParams::new(1103515245, 12345, 15),
    LcgParams::new(22695477, 1, 23),
    // MSVC rand(), also the fixed table for versions 0 and 1
    LcgParams::new(214013, 2531011, 24),
    LcgParams::new(65793, 4282663, 8),
];

const FIXED_TABLE: usize = 2;

/// Initial keys for versions 0 and 1, indexed by `key_index & 0x3F`.
const KEY_TABLE: [u32; 64] = [
    1210253353, 1736710334, 1030507233, 1924017366, 1603299666, 1844516425, 1102797553, 32188137,
    782633907, 356258523, 957120135, 10030910, 811467044, 1226589197, 1303858438, 1423840583,
    756169139, 1304954701, 1723556931, 648430219, 1560506399, 1987934810, 305677577, 505363237,
    450129501, 1811702731, 2146795414, 842747461, 638394899, 51014537, 198914076, 120739502,
    1973027104, 586031952, 1484278592, 1560111926, 441007634, 1006001970, 2038250142, 232546121,
    827280557, 1307729428, 775964996, 483398502, 1724135019, 2125939248, 742088754, 1411519905,
    136462070, 1084053905, 2039157473, 1943671327, 650795184, 151139993, 1467120569, 1883837341,
    1249929516, 382015614, 1020618905, 1082135529, 870997426, 1221338057, 1623152467, 1020681319,
];

/// Per-file decryption state, created from a validated header.
#[derive(Debug, Clone)]
pub struct CipherContext {
    lcg: LcgParams,
    init_key: u32,
    key: u32,
    pos: u64,
}

impl CipherContext {
    /// Validates `header` against `filename` and derives the initial key.
    ///
    /// Only the part of `filename` after the last `/` takes part in the
    /// derivation. Nothing is decrypted if the header is rejected.
    pub fn new(filename: &str, header: &[u8]) -> Result<Self, CipherError> {
        if header.len() < HEADER_SIZE {
            return Err(CipherError::InvalidHeader);
        }

        let basename = filename.rsplit('/').next().unwrap_or(filename);
        let mut named = Vec::with_capacity(NAME_PREFIX.len() + basename.len());
        named.extend_from_slice(NAME_PREFIX);
        named.extend_from_slice(basename.as_bytes());
        let digest = Md5::digest(&named);

        if (0..3).any(|i| header[i] != !digest[4 + i]) {
            return Err(CipherError::InvalidHeader);
        }

        let (lcg, init_key) = match header[7] {
            version @ 3.. => return Err(CipherError::UnsupportedCipherVersion(version)),
            2 => {
                let lcg = *LCG_TABLES
                    .get(usize::from(header[6]))
                    .ok_or(CipherError::UnknownLcgTable(header[6]))?;
                let init_key = u32::from_be_bytes([digest[8], digest[9], digest[10], digest[11]]);
                (lcg, init_key)
            }
            version => {
                let key_index = u16::from_be_bytes([header[10], header[11]]);
                let checksum: u32 = named.iter().map(|&b| u32::from(b)).sum();
                if u32::from(key_index) != checksum {
                    return Err(CipherError::KeyIndexMismatch {
                        header: key_index,
                        name: checksum,
                    });
                }

                let mut init_key = KEY_TABLE[usize::from(key_index & 0x3F)];
                if version == 1 {
                    init_key = !init_key;
                }
                (LCG_TABLES[FIXED_TABLE], init_key)
            }
        };

        Ok(Self {
            lcg,
            init_key,
            key: init_key,
            pos: 0,
        })
    }

    /// The LCG parameters selected by the header.
    pub fn lcg(&self) -> LcgParams {
        self.lcg
    }

    /// The key register value the stream started from.
    pub fn initial_key(&self) -> u32 {
        self.init_key
    }

    /// Number of bytes decrypted since creation or the last `reset`.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Rewinds the keystream to the start of the file.
    pub fn reset(&mut self) {
        self.key = self.init_key;
        self.pos = 0;
    }

    /// Decrypts one byte and advances the keystream.
    #[inline]
    pub fn decrypt_byte(&mut self, byte: u8) -> u8 {
        let plain = byte ^ (self.key >> self.lcg.shift) as u8;
        self.key = self.lcg.next(self.key);
        self.pos += 1;
        plain
    }

    /// Decrypts `buf` in place, continuing from the current position.
    pub fn decrypt_in_place(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            *byte = self.decrypt_byte(*byte);
        }
    }

    /// Decrypts `data` into a new buffer, continuing from the current position.
    pub fn decrypt_block(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.decrypt_in_place(&mut out);
        out
    }

    /// Lazily decrypts a byte source.
    pub fn decrypt_iter<'a, I>(&'a mut self, source: I) -> impl Iterator<Item = u8> + 'a
    where
        I: IntoIterator<Item = u8>,
        I::IntoIter: 'a,
    {
        source.into_iter().map(move |b| self.decrypt_byte(b))
    }
}

/// Decrypts a whole sealed file: the header followed by the ciphertext.
pub fn decrypt_file(filename: &str, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
    if sealed.len() < HEADER_SIZE {
        return Err(CipherError::InvalidHeader);
    }
    let (header, body) = sealed.split_at(HEADER_SIZE);
    let mut ctx = CipherContext::new(filename, header)?;
    Ok(ctx.decrypt_block(body))
}
