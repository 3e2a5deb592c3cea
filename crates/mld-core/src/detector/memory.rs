//! Raw memory access
//!
//! The only place the detector reads host memory. Everything else works on
//! registry data.

use crate::types::POINTER_SIZE;
use std::ops::Range;

/// Read the pointer-sized value stored at `address`
///
/// Returns `None` unless the whole read lies inside `extent`. `extent` must
/// be the extent of a tracked record: registering a record is unsafe and
/// makes the caller vouch that the extent stays readable while tracked.
pub(crate) fn read_pointer(extent: &Range<usize>, address: usize) -> Option<usize> {
    let end = address.checked_add(POINTER_SIZE)?;
    if address < extent.start || end > extent.end {
        return None;
    }

    // SAFETY: [address, end) lies inside a tracked extent (see above). Host
    // layouts are not required to align pointer fields.
    Some(unsafe { (address as *const usize).read_unaligned() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_inside_extent() {
        let words: [usize; 2] = [0xdead_beef, 42];
        let base = words.as_ptr() as usize;
        let extent = base..base + 2 * POINTER_SIZE;

        assert_eq!(read_pointer(&extent, base), Some(0xdead_beef));
        assert_eq!(read_pointer(&extent, base + POINTER_SIZE), Some(42));
    }

    #[test]
    fn test_read_unaligned() {
        let mut bytes = [0u8; POINTER_SIZE + 3];
        bytes[3..].copy_from_slice(&0x1234usize.to_ne_bytes());
        let base = bytes.as_ptr() as usize;
        let extent = base..base + bytes.len();

        assert_eq!(read_pointer(&extent, base + 3), Some(0x1234));
    }

    #[test]
    fn test_read_outside_extent() {
        let words: [usize; 2] = [1, 2];
        let base = words.as_ptr() as usize;
        let extent = base..base + 2 * POINTER_SIZE;

        assert_eq!(read_pointer(&extent, base + POINTER_SIZE + 1), None);
        assert_eq!(read_pointer(&extent, base - 1), None);
        assert_eq!(read_pointer(&(0..8), usize::MAX - 2), None);
    }
}
