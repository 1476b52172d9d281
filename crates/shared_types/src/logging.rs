// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

/// For timestamps, we use the time crate's implementation of ISO 8601 with default config.
///
/// In default config:
/// - The time has precision to the second and nine decimal digits.
///
/// So the width is fixed, unlike the default `Display` impl.
/// Formatting a UTC timestamp with a well-known format can't fail in practice;
/// if it ever does we log without the timestamp rather than panic.
#[doc(hidden)]
pub fn now_timestamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Iso8601::DEFAULT)
        .unwrap_or_else(|_| String::from("<no timestamp>"))
}

#[macro_export]
macro_rules! info_with_timestamp {
    ($fmt:expr $(, $args:expr)*) => {
        shared_types::log::info!(concat!("{_when}: ", $fmt) $(, $args)*,
            _when=shared_types::logging::now_timestamp())
    };
}

#[macro_export]
macro_rules! debug_with_timestamp {
    ($fmt:expr $(, $args:expr)*) => {
        shared_types::log::debug!(concat!("{_when}: ", $fmt) $(, $args)*,
            _when=shared_types::logging::now_timestamp())
    };
}

#[macro_export]
macro_rules! warn_with_timestamp {
    ($fmt:expr $(, $args:expr)*) => {
        shared_types::log::warn!(concat!("{_when}: ", $fmt) $(, $args)*,
            _when=shared_types::logging::now_timestamp())
    };
}

#[cfg(test)]
mod tests {
    use super::now_timestamp;

    #[test]
    fn timestamp_is_fixed_width_iso8601() {
        let a = now_timestamp();
        let b = now_timestamp();
        assert_eq!(a.len(), b.len());
        assert!(a.ends_with('Z'), "{a}");
        assert!(a.contains('T'), "{a}");
    }
}
