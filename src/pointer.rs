use std::fmt;

/// A segment:offset far pointer, as stored in an EXE relocation table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Pointer {
    pub segment: u16,
    pub offset: u16,
}

impl Pointer {
    /// Returns the linear address `segment * 16 + offset`.
    pub fn abs(&self) -> u32 {
        u32::from(self.segment) * 16 + u32::from(self.offset)
    }

    /// Splits a linear address into a normalized pointer, with the offset in
    /// the range 0..=15. Returns `None` if the segment would not fit in 16
    /// bits (the address is beyond 20 bits).
    pub fn from_abs(address: u32) -> Option<Self> {
        let segment = u16::try_from(address >> 4).ok()?;
        Some(Self {
            segment,
            offset: (address & 0xf) as u16,
        })
    }

    /// Encodes the pointer as a relocation table entry: the offset, then the
    /// segment, both little-endian. This is the little-endian encoding of the
    /// 32-bit value `(segment << 16) | offset`.
    pub fn to_le_bytes(&self) -> [u8; 4] {
        ((u32::from(self.segment) << 16) | u32::from(self.offset)).to_le_bytes()
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.segment, self.offset)
    }
}

#[test]
fn test_from_abs() {
    assert_eq!(Pointer::from_abs(0), Some(Pointer { segment: 0, offset: 0 }));
    assert_eq!(Pointer::from_abs(0x12345), Some(Pointer { segment: 0x1234, offset: 5 }));
    assert_eq!(Pointer::from_abs(0xfffff), Some(Pointer { segment: 0xffff, offset: 0xf }));
    assert_eq!(Pointer::from_abs(0x100000), None);
    assert_eq!(Pointer::from_abs(0x12345).unwrap().abs(), 0x12345);
}

#[test]
fn test_to_le_bytes() {
    assert_eq!(Pointer { segment: 0x1234, offset: 0x0005 }.to_le_bytes(), [0x05, 0x00, 0x34, 0x12]);
    assert_eq!(Pointer { segment: 0, offset: 0xf }.to_le_bytes(), [0x0f, 0, 0, 0]);
}

#[test]
fn test_display() {
    assert_eq!(format!("{}", Pointer { segment: 0x1234, offset: 0x0005 }), "1234:0005");
    assert_eq!(format!("{}", Pointer::from_abs(0xfffff).unwrap()), "ffff:000f");
}
