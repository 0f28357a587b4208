use num_traits::{CheckedAdd, CheckedSub, PrimInt};
use zerocopy::NetworkEndian;

//------------ AddressFamily (trait) ----------------------------------------
//
/// The address family of an IP address as a Trait.
///
/// Each family has its own exactly-fitting type, so that the route tables of
/// one pipeline only ever store the number of bytes that family needs. The
/// pipeline is generic over this trait and instantiated once per family.
///
/// All bit arithmetic on addresses (truncation, bit tests, common prefix
/// length) is implemented once here, on top of the primitive integer that
/// backs the family.
pub trait AddressFamily:
    std::fmt::Debug
    + std::hash::Hash
    + std::fmt::Display
    + Eq
    + Copy
    + Ord
    + 'static
    + zerocopy::FromBytes
    + zerocopy::IntoBytes
    + zerocopy::KnownLayout
    + zerocopy::Immutable
    + zerocopy::Unaligned
{
    /// The number of bits in the byte representation of the family.
    const BITS: u8;

    /// The type actually holding the value, u32 for IPv4, and u128 for IPv6.
    type Inner: PrimInt + Into<Self> + std::fmt::Debug;

    /// The std::net that the value of self belongs to. So,
    /// [std::net::Ipv4Addr], and [std::net::Ipv6Addr] for IPv4, and IPv6
    /// respectively.
    type InnerIpAddr;

    fn from_ipaddr(ip_addr: Self::InnerIpAddr) -> Self;

    /// Returns `None` if `ip_addr` belongs to the other family.
    fn try_from_ipaddr(ip_addr: std::net::IpAddr) -> Option<Self>;

    /// Turn self in to a [std::net::IpAddr].
    fn into_ipaddr(self) -> std::net::IpAddr;

    fn into_inner(self) -> Self::Inner;

    fn zero() -> Self {
        <Self::Inner as num_traits::Zero>::zero().into()
    }

    /// The all-ones address, i.e. the last address of the family.
    fn max_addr() -> Self {
        <Self::Inner as num_traits::Bounded>::max_value().into()
    }

    /// The bits after `len` set to one, the bits up to `len` set to zero.
    fn host_mask(len: u8) -> Self::Inner {
        if len >= Self::BITS {
            return <Self::Inner as num_traits::Zero>::zero();
        }
        <Self::Inner as num_traits::Bounded>::max_value() >> len as usize
    }

    /// fill the bits after the specified len with zeros. Interpreted as an IP
    /// Prefix, this means that self will be truncated to the specified len.
    fn truncate_to_len(self, len: u8) -> Self {
        (self.into_inner() & !Self::host_mask(len)).into()
    }

    /// fill the bits after the specified len with ones, giving the last
    /// address covered by a prefix of length `len` starting at self.
    fn last_in_len(self, len: u8) -> Self {
        (self.into_inner() | Self::host_mask(len)).into()
    }

    /// The bit at position `pos`, counting from the most significant bit.
    /// Positions at or beyond `BITS` read as zero.
    fn bit_at(self, pos: u8) -> bool {
        if pos >= Self::BITS {
            return false;
        }
        let one = <Self::Inner as num_traits::One>::one();
        (self.into_inner() >> (Self::BITS - 1 - pos) as usize) & one == one
    }

    /// The number of leading bits self and other have in common.
    fn common_prefix_len(self, other: Self) -> u8 {
        let diff = self.into_inner() ^ other.into_inner();
        (diff.leading_zeros() as u8).min(Self::BITS)
    }

    fn checked_successor(self) -> Option<Self> {
        self.into_inner()
            .checked_add(&<Self::Inner as num_traits::One>::one())
            .map(Into::into)
    }

    fn checked_predecessor(self) -> Option<Self> {
        self.into_inner()
            .checked_sub(&<Self::Inner as num_traits::One>::one())
            .map(Into::into)
    }
}

//-------------- Ipv4 Type --------------------------------------------------

/// Exactly fitting IPv4 bytes (4 octets).
pub type IPv4 = zerocopy::U32<NetworkEndian>;

impl AddressFamily for IPv4 {
    const BITS: u8 = 32;
    type Inner = u32;
    type InnerIpAddr = std::net::Ipv4Addr;

    fn from_ipaddr(ip_addr: Self::InnerIpAddr) -> Self {
        IPv4::from(ip_addr.octets())
    }

    fn try_from_ipaddr(ip_addr: std::net::IpAddr) -> Option<Self> {
        match ip_addr {
            std::net::IpAddr::V4(addr) => Some(Self::from_ipaddr(addr)),
            std::net::IpAddr::V6(_) => None,
        }
    }

    fn into_ipaddr(self) -> std::net::IpAddr {
        std::net::IpAddr::V4(std::net::Ipv4Addr::from(u32::from(self)))
    }

    fn into_inner(self) -> u32 {
        self.get()
    }
}

//-------------- Ipv6 Type --------------------------------------------------

/// Exactly fitting IPv6 bytes (16 octets).
pub type IPv6 = zerocopy::U128<NetworkEndian>;

impl AddressFamily for IPv6 {
    const BITS: u8 = 128;
    type Inner = u128;
    type InnerIpAddr = std::net::Ipv6Addr;

    fn from_ipaddr(ip_addr: Self::InnerIpAddr) -> Self {
        IPv6::from(ip_addr.octets())
    }

    fn try_from_ipaddr(ip_addr: std::net::IpAddr) -> Option<Self> {
        match ip_addr {
            std::net::IpAddr::V6(addr) => Some(Self::from_ipaddr(addr)),
            std::net::IpAddr::V4(_) => None,
        }
    }

    fn into_ipaddr(self) -> std::net::IpAddr {
        std::net::IpAddr::V6(std::net::Ipv6Addr::from(u128::from(self)))
    }

    fn into_inner(self) -> u128 {
        self.get()
    }
}

// The zerocopy byte order types only print their integer value, so the
// families get a helper to show up as addresses in logs.
pub(crate) fn fmt_addr<AF: AddressFamily>(addr: AF) -> String {
    addr.into_ipaddr().to_string()
}
