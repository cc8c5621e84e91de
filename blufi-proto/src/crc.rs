/// CRC16 used by BluFi checksummed frames.
///
/// Polynomial 0x1021, MSB first, initial register 0, no final XOR
/// (the XMODEM flavour of CRC-16/CCITT).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::crc16;

    #[test]
    fn check_value() {
        assert_eq!(crc16(b"123456789"), 0x31c3);
    }

    #[test]
    fn known_vectors() {
        assert_eq!(crc16(&[]), 0x0000);
        assert_eq!(crc16(&[0x01, 0x02, 0x03, 0x04]), 0x0d03);
    }
}
