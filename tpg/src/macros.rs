/// Define an enumeration with known variants and an unknown representation.
///
/// Message ids carry their module in a raw byte. Not all values are assigned, some are reserved
/// for users of the crate. This macro makes it more ergonomic to define a representation for such
/// fields by providing converters to and from an underlying representation derived from the
/// definition.
// Copyright (C) 2016 whitequark@whitequark.org
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr
            ),+ $(,)*
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// A value that is not assigned to any variant.
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

/// Log at `trace` level if the control block is traced.
///
/// The first argument is anything with `traced()` and `log_id()` methods, i.e. an `L4Cb`. The
/// remaining arguments are passed to `tracing::trace!` with the block id as an added field.
macro_rules! cb_trace {
    ($cb:expr, $($arg:tt)+) => {
        if $cb.traced() {
            ::tracing::trace!(cb = %$cb.log_id(), $($arg)+);
        }
    };
}

/// Log at `debug` level if the control block is traced.
macro_rules! cb_debug {
    ($cb:expr, $($arg:tt)+) => {
        if $cb.traced() {
            ::tracing::debug!(cb = %$cb.log_id(), $($arg)+);
        }
    };
}
