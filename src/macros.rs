// Typed access to the variants of `Table`. Asking a table for a type it
// does not have is a fatal topology error, not a panic.
macro_rules! table_accessors {
    ( $( $variant: ident, $ty: ident, $as_ref: ident, $as_mut: ident );* ) => {
        impl<AF: AddressFamily, M: Meta> Table<AF, M> {
            $(
                #[allow(dead_code)]
                pub(crate) fn $as_ref(
                    &self
                ) -> Result<&$ty<AF, M>, RouteTableError> {
                    match self {
                        Table::$variant(t) => Ok(t),
                        other => Err(RouteTableError::TableTypeMismatch {
                            expected: TableType::$variant,
                            found: other.table_type(),
                        }),
                    }
                }

                #[allow(dead_code)]
                pub(crate) fn $as_mut(
                    &mut self
                ) -> Result<&mut $ty<AF, M>, RouteTableError> {
                    match self {
                        Table::$variant(t) => Ok(t),
                        other => Err(RouteTableError::TableTypeMismatch {
                            expected: TableType::$variant,
                            found: other.table_type(),
                        }),
                    }
                }
            )*
        }
    };
}

// Run `$body` against the single-family RIB that matches the address
// family of `$addr`, with `$rib` bound to (a `mut` or `ref` borrow of) that
// RIB and `$af_addr` to the address converted to that family. The body is
// expanded once per family, so it type checks against both
// `RibAf<IPv4, _>` and `RibAf<IPv6, _>`.
macro_rules! af_dispatch {
    ( mut $self: ident . $field4: ident | $field6: ident,
      $addr: expr, |$rib: ident, $af_addr: ident| $body: expr ) => {
        match $addr {
            std::net::IpAddr::V4(addr) => {
                let $rib = &mut $self.$field4;
                let $af_addr = <$crate::IPv4 as $crate::AddressFamily>
                    ::from_ipaddr(addr);
                $body
            }
            std::net::IpAddr::V6(addr) => {
                let $rib = &mut $self.$field6;
                let $af_addr = <$crate::IPv6 as $crate::AddressFamily>
                    ::from_ipaddr(addr);
                $body
            }
        }
    };
    ( ref $self: ident . $field4: ident | $field6: ident,
      $addr: expr, |$rib: ident, $af_addr: ident| $body: expr ) => {
        match $addr {
            std::net::IpAddr::V4(addr) => {
                let $rib = &$self.$field4;
                let $af_addr = <$crate::IPv4 as $crate::AddressFamily>
                    ::from_ipaddr(addr);
                $body
            }
            std::net::IpAddr::V6(addr) => {
                let $rib = &$self.$field6;
                let $af_addr = <$crate::IPv6 as $crate::AddressFamily>
                    ::from_ipaddr(addr);
                $body
            }
        }
    };
}
