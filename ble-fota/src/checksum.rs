//! Image checksum, bit-exact with the STM32 CRC unit in its default setup.
//!
//! Polynomial 0x04C11DB7, init 0xFFFFFFFF, no reflection, no final XOR
//! (CRC-32/MPEG-2), fed 32-bit words read little-endian from flash with the
//! most significant byte first. Only whole words are covered, so a trailing
//! partial word does not contribute. The mobile client computes the same value.

use crc::{Crc, Digest, CRC_32_MPEG_2};
use dual_bank::{Bank, Error, FlashAccess, FlashControl};
use embedded_storage::nor_flash::NorFlash;

static STM32_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

const READ_BLOCK: usize = 64;

/// Incremental image CRC over byte chunks of any length.
pub struct ImageCrc {
    digest: Digest<'static, u32>,
    word: [u8; 4],
    word_len: usize,
}

impl ImageCrc {
    pub fn new() -> Self {
        Self {
            digest: STM32_CRC.digest(),
            word: [0; 4],
            word_len: 0,
        }
    }

    pub fn update(&mut self, mut bytes: &[u8]) {
        if self.word_len > 0 {
            let take = (4 - self.word_len).min(bytes.len());
            self.word[self.word_len..self.word_len + take].copy_from_slice(&bytes[..take]);
            self.word_len += take;
            bytes = &bytes[take..];
            if self.word_len < 4 {
                return;
            }
            self.push_word();
        }

        let mut words = bytes.chunks_exact(4);
        for word in &mut words {
            self.digest.update(&[word[3], word[2], word[1], word[0]]);
        }
        let rest = words.remainder();
        self.word[..rest.len()].copy_from_slice(rest);
        self.word_len = rest.len();
    }

    fn push_word(&mut self) {
        let [b0, b1, b2, b3] = self.word;
        self.digest.update(&[b3, b2, b1, b0]);
        self.word_len = 0;
    }

    pub fn finalize(self) -> u32 {
        self.digest.finalize()
    }
}

impl Default for ImageCrc {
    fn default() -> Self {
        Self::new()
    }
}

pub fn image_crc(bytes: &[u8]) -> u32 {
    let mut crc = ImageCrc::new();
    crc.update(bytes);
    crc.finalize()
}

/// CRC of `[0, len)` of `bank`, read back from flash.
pub fn bank_crc<C: FlashControl, F: NorFlash>(
    flash: &mut FlashAccess<C, F>,
    bank: Bank,
    len: u32,
) -> Result<u32, Error> {
    let mut crc = ImageCrc::new();
    let mut block = [0u8; READ_BLOCK];
    let mut offset = 0;
    while offset < len {
        let n = (len - offset).min(READ_BLOCK as u32) as usize;
        flash.read(bank, offset, &mut block[..n])?;
        crc.update(&block[..n]);
        offset += n as u32;
    }
    Ok(crc.finalize())
}
