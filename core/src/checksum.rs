//! 16-bit integrity code for log records
//!
//! Uses CRC-16/IBM-3740 (polynomial 0x1021, init 0xFFFF, no reflection),
//! commonly called CRC-16/CCITT-FALSE.

use crc::{Crc, CRC_16_IBM_3740};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Calculate the checksum of `data`
pub fn checksum(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Returns `true` if `data` checksums to `expected`
pub fn validate(data: &[u8], expected: u16) -> bool {
    checksum(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(checksum(b""), 0xFFFF);
        assert_eq!(checksum(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_validate() {
        let data = b"Test data for checksum";
        let sum = checksum(data);
        assert!(validate(data, sum));
        assert!(!validate(data, sum ^ 1));
    }

    #[test]
    fn test_single_bit_flip_detected() {
        let data = [0x12u8, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
        let sum = checksum(&data);

        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data;
                corrupted[byte] ^= 1 << bit;
                assert!(!validate(&corrupted, sum), "byte {} bit {}", byte, bit);
            }
        }
    }
}
