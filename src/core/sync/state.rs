/*!
 * Packed Lock State
 *
 * Two protocol flags in one byte so a reader observes both with a single load:
 * - bit 0: version index (which counter new readers register with)
 * - bit 1: left-right (which data copy new readers read)
 *
 * Only the writer holding the gate ever stores a new state, so transitions
 * are plain load/store pairs, never read-modify-write.
 */

const VERSION_BIT: u8 = 0b01;
const LEFT_RIGHT_BIT: u8 = 0b10;

/// Snapshot of the two protocol flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockState(u8);

impl LockState {
    /// Both flags clear: readers register on counter 0 and read copy 0
    pub const INITIAL: Self = Self(0);

    /// Decode a raw state word (extra bits are ignored)
    #[inline(always)]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & (VERSION_BIT | LEFT_RIGHT_BIT))
    }

    #[inline(always)]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Counter that new readers register with
    #[inline(always)]
    pub const fn version_index(self) -> usize {
        (self.0 & VERSION_BIT) as usize
    }

    /// Counter that no new reader registers with
    #[inline(always)]
    pub const fn inactive_version(self) -> usize {
        self.version_index() ^ 1
    }

    /// Data copy that new readers read
    #[inline(always)]
    pub const fn left_right(self) -> usize {
        ((self.0 & LEFT_RIGHT_BIT) >> 1) as usize
    }

    #[inline(always)]
    pub const fn toggle_left_right(self) -> Self {
        Self(self.0 ^ LEFT_RIGHT_BIT)
    }

    #[inline(always)]
    pub const fn toggle_version(self) -> Self {
        Self(self.0 ^ VERSION_BIT)
    }
}
