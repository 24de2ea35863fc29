//! Hot-plug pins, output ports, and the masks used to accumulate them
//!
//! A pin is a physical hot-plug detect line; a port is a logical output.
//! The interrupt layer reports pins as raw `u32` bitmasks (bit N = pin
//! with index N). Inside the core those masks become [`PinSet`] /
//! [`PortSet`] values so draining and merging stay explicit.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::constants::pins::{NUM_PINS, NUM_PORTS};

// ============================================================================
// Pins and Ports
// ============================================================================

/// Physical hot-plug detect line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pin {
    Tv,
    Crt,
    SdvoB,
    SdvoC,
    PortA,
    PortB,
    PortC,
    PortD,
    PortE,
    PortF,
}

impl Pin {
    /// All pins in raw-mask bit order
    pub const ALL: [Pin; NUM_PINS] = [
        Pin::Tv,
        Pin::Crt,
        Pin::SdvoB,
        Pin::SdvoC,
        Pin::PortA,
        Pin::PortB,
        Pin::PortC,
        Pin::PortD,
        Pin::PortE,
        Pin::PortF,
    ];

    /// Bit index of this pin in raw masks
    pub fn index(self) -> usize {
        self as usize
    }

    /// Pin for a raw bit index, `None` for anything outside the enumeration
    pub fn from_index(index: usize) -> Option<Pin> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pin::Tv => "TV",
            Pin::Crt => "CRT",
            Pin::SdvoB => "SDVO-B",
            Pin::SdvoC => "SDVO-C",
            Pin::PortA => "PORT-A",
            Pin::PortB => "PORT-B",
            Pin::PortC => "PORT-C",
            Pin::PortD => "PORT-D",
            Pin::PortE => "PORT-E",
            Pin::PortF => "PORT-F",
        };
        f.write_str(name)
    }
}

/// Logical output port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Port {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl Port {
    /// All ports in raw-mask bit order
    pub const ALL: [Port; NUM_PORTS] = [Port::A, Port::B, Port::C, Port::D, Port::E, Port::F];

    /// Bit index of this port in raw masks
    pub fn index(self) -> usize {
        self as usize
    }

    /// Port for a raw bit index, `None` for anything outside the enumeration
    pub fn from_index(index: usize) -> Option<Port> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Port::A => 'A',
            Port::B => 'B',
            Port::C => 'C',
            Port::D => 'D',
            Port::E => 'E',
            Port::F => 'F',
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Pin <-> Port Mapping
// ============================================================================

/// Hard-wired pin/port pairing shared by every platform
static DEFAULT_PAIRING: [(Pin, Port); 6] = [
    (Pin::PortA, Port::A),
    (Pin::PortB, Port::B),
    (Pin::PortC, Port::C),
    (Pin::PortD, Port::D),
    (Pin::PortE, Port::E),
    (Pin::PortF, Port::F),
];

/// Overrides for the platform variant where port F is wired to the port E pin.
/// Consulted before DEFAULT_PAIRING.
static ALTERNATE_PAIRING: [(Pin, Port); 1] = [(Pin::PortE, Port::F)];

fn pairing(alternate: bool) -> impl Iterator<Item = &'static (Pin, Port)> {
    let overrides: &'static [(Pin, Port)] = if alternate { &ALTERNATE_PAIRING } else { &[] };
    overrides.iter().chain(DEFAULT_PAIRING.iter())
}

/// Port hard-associated with `pin`, or `None` if the pin has no port
pub fn port_for_pin(pin: Pin, alternate: bool) -> Option<Port> {
    pairing(alternate).find(|(p, _)| *p == pin).map(|(_, port)| *port)
}

/// Default pin for `port`, or `None` if no pin is hard-associated
pub fn pin_for_port(port: Port, alternate: bool) -> Option<Pin> {
    pairing(alternate).find(|(_, p)| *p == port).map(|(pin, _)| *pin)
}

// ============================================================================
// Masks
// ============================================================================

/// Enumerations that can live in a [`Mask`]
pub trait MaskIndex: Copy + 'static {
    /// Every member, in bit order
    fn members() -> &'static [Self];

    /// Bit index of this member
    fn bit_index(self) -> usize;
}

impl MaskIndex for Pin {
    fn members() -> &'static [Self] {
        &Pin::ALL
    }

    fn bit_index(self) -> usize {
        self.index()
    }
}

impl MaskIndex for Port {
    fn members() -> &'static [Self] {
        &Port::ALL
    }

    fn bit_index(self) -> usize {
        self.index()
    }
}

/// Bitmask set of pins or ports
///
/// Coalescing happens by OR-ing new bits in; consumers drain the whole
/// set at once with [`Mask::take`] while holding the state lock.
pub struct Mask<T> {
    bits: u32,
    _marker: PhantomData<T>,
}

/// Set of hot-plug pins
pub type PinSet = Mask<Pin>;

/// Set of output ports
pub type PortSet = Mask<Port>;

impl<T: MaskIndex> Mask<T> {
    /// Empty set
    pub const fn empty() -> Self {
        Self {
            bits: 0,
            _marker: PhantomData,
        }
    }

    /// Set with every member present
    pub fn all() -> Self {
        T::members().iter().copied().collect()
    }

    /// Build from a raw mask, dropping bits outside the enumeration
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self {
            bits: bits & Self::all().bits,
            _marker: PhantomData,
        }
    }

    /// Bits of `raw` that do not correspond to any member
    pub fn unknown_bits(raw: u32) -> u32 {
        raw & !Self::all().bits
    }

    pub fn bits(self) -> u32 {
        self.bits
    }

    pub fn is_empty(self) -> bool {
        self.bits == 0
    }

    pub fn len(self) -> usize {
        self.bits.count_ones() as usize
    }

    pub fn contains(self, member: T) -> bool {
        self.bits & (1 << member.bit_index()) != 0
    }

    pub fn insert(&mut self, member: T) {
        self.bits |= 1 << member.bit_index();
    }

    pub fn remove(&mut self, member: T) {
        self.bits &= !(1 << member.bit_index());
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
            _marker: PhantomData,
        }
    }

    /// Drain the set, leaving it empty
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Members in bit order
    pub fn iter(self) -> impl Iterator<Item = T> {
        T::members()
            .iter()
            .copied()
            .filter(move |member| self.contains(*member))
    }
}

// Manual impls: derives would put bounds on T.
impl<T> Clone for Mask<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Mask<T> {}

impl<T> PartialEq for Mask<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<T> Eq for Mask<T> {}

impl<T> Default for Mask<T> {
    fn default() -> Self {
        Self {
            bits: 0,
            _marker: PhantomData,
        }
    }
}

impl<T: MaskIndex + fmt::Debug> fmt::Debug for Mask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: MaskIndex> FromIterator<T> for Mask<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut mask = Self::empty();
        for member in iter {
            mask.insert(member);
        }
        mask
    }
}

impl<T: MaskIndex> BitOr for Mask<T> {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl<T: MaskIndex> BitOrAssign for Mask<T> {
    fn bitor_assign(&mut self, rhs: Self) {
        self.bits |= rhs.bits;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pairing() {
        assert_eq!(port_for_pin(Pin::PortE, false), Some(Port::E));
        assert_eq!(port_for_pin(Pin::PortF, false), Some(Port::F));
        assert_eq!(pin_for_port(Port::E, false), Some(Pin::PortE));
        assert_eq!(pin_for_port(Port::F, false), Some(Pin::PortF));
    }

    #[test]
    fn test_alternate_pairing() {
        assert_eq!(port_for_pin(Pin::PortE, true), Some(Port::F));
        assert_eq!(pin_for_port(Port::F, true), Some(Pin::PortE));
        // Untouched pairs keep the default mapping
        assert_eq!(port_for_pin(Pin::PortA, true), Some(Port::A));
        assert_eq!(pin_for_port(Port::E, true), Some(Pin::PortE));
    }

    #[test]
    fn test_legacy_pins_have_no_port() {
        for pin in [Pin::Tv, Pin::Crt, Pin::SdvoB, Pin::SdvoC] {
            assert_eq!(port_for_pin(pin, false), None);
            assert_eq!(port_for_pin(pin, true), None);
        }
    }

    #[test]
    fn test_from_index_out_of_range() {
        assert_eq!(Pin::from_index(4), Some(Pin::PortA));
        assert_eq!(Pin::from_index(NUM_PINS), None);
        assert_eq!(Port::from_index(usize::MAX), None);
    }

    #[test]
    fn test_mask_from_raw_drops_unknown_bits() {
        let raw = (1 << Pin::Crt.index()) | (1 << 31);
        let set = PinSet::from_bits_truncate(raw);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Pin::Crt]);
        assert_eq!(PinSet::unknown_bits(raw), 1 << 31);
    }

    #[test]
    fn test_mask_take_drains() {
        let mut ports: PortSet = [Port::B, Port::D].into_iter().collect();
        let drained = ports.take();
        assert!(ports.is_empty());
        assert_eq!(drained.len(), 2);
        assert!(drained.contains(Port::D));
    }

    #[test]
    fn test_mask_union_and_remove() {
        let mut a: PinSet = [Pin::PortA].into_iter().collect();
        a |= [Pin::PortB].into_iter().collect();
        a.remove(Pin::PortA);
        assert!(!a.contains(Pin::PortA));
        assert!(a.contains(Pin::PortB));
    }
}
