use bitflags::bitflags;

bitflags! {
    /// IPv4 control flags, positioned as in the flags/fragment-offset word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Ipv4Flags: u16 {
        /// Reserved bit, must be zero.
        const RESERVED = 0x8000;
        /// Don't Fragment. The covert sender sets it to keep the identification intact.
        const DONT_FRAGMENT = 0x4000;
        /// More Fragments.
        const MORE_FRAGMENTS = 0x2000;
    }
}

impl Ipv4Flags {
    /// Mask selecting the flag bits out of the flags/fragment-offset word.
    pub const MASK: u16 = 0xE000;

    /// Extract the flags from a raw flags/fragment-offset word.
    pub fn from_word(word: u16) -> Self {
        Self::from_bits_truncate(word & Self::MASK)
    }
}
