// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use num_traits::PrimInt;

/// Calculate the amount of padding that needs to be added to align the
/// specified offset to a multiple of `alignment`.
pub fn calc<N: PrimInt>(offset: N, alignment: N) -> N {
    let r = offset % alignment;
    if r == N::zero() {
        N::zero()
    } else {
        alignment - r
    }
}

/// Round to the next multiple of `alignment`.
pub fn round<N: PrimInt>(offset: N, alignment: N) -> Option<N> {
    let remain = calc(offset, alignment);
    offset.checked_add(&remain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calc_padding() {
        assert_eq!(calc(0u32, 4), 0);
        assert_eq!(calc(1u32, 4), 3);
        assert_eq!(calc(7u64, 4), 1);
        assert_eq!(calc(8u64, 4), 0);
    }

    #[test]
    fn round_overflow() {
        assert_eq!(round(5u8, 4), Some(8));
        assert_eq!(round(255u8, 4), None);
    }
}
