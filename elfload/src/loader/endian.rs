//! Byte-order aware access to multi-byte fields

/// Data encoding of an ELF image, taken from `EI_DATA`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Offsets are expected to be validated by the caller.
    /// Reading past the end of `data` is a bug and panics.
    pub fn read16(self, data: &[u8], offset: usize) -> u16 {
        let mut bytes = [0u8; 2];
        bytes.copy_from_slice(&data[offset..offset + 2]);

        match self {
            Endian::Little => u16::from_le_bytes(bytes),
            Endian::Big => u16::from_be_bytes(bytes),
        }
    }

    pub fn read32(self, data: &[u8], offset: usize) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&data[offset..offset + 4]);

        match self {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        }
    }

    pub fn write32(self, data: &mut [u8], offset: usize, value: u32) {
        let bytes = match self {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };

        data[offset..offset + 4].copy_from_slice(&bytes);
    }

    pub fn name(self) -> &'static str {
        match self {
            Endian::Little => "little-endian",
            Endian::Big => "big-endian",
        }
    }
}

#[cfg(test)]
#[test]
fn test_read() {
    let data = [0x12, 0x34, 0x56, 0x78, 0x9a];

    assert_eq!(Endian::Little.read16(&data, 0), 0x3412);
    assert_eq!(Endian::Big.read16(&data, 0), 0x1234);
    assert_eq!(Endian::Little.read32(&data, 1), 0x9a785634);
    assert_eq!(Endian::Big.read32(&data, 1), 0x3456789a);
}

#[cfg(test)]
#[test]
fn test_write() {
    let mut data = [0u8; 6];

    Endian::Big.write32(&mut data, 1, 0xdeadbeef);
    assert_eq!(data, [0, 0xde, 0xad, 0xbe, 0xef, 0]);

    Endian::Little.write32(&mut data, 2, 0xdeadbeef);
    assert_eq!(data, [0, 0xde, 0xef, 0xbe, 0xad, 0xde]);
    assert_eq!(Endian::Little.read32(&data, 2), 0xdeadbeef);
}

#[cfg(test)]
#[test]
#[should_panic]
fn test_read_out_of_bounds() {
    let data = [0u8; 3];
    Endian::Little.read32(&data, 0);
}
