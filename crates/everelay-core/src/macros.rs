/// Defines a fixed-size byte array newtype whose `Display`/`FromStr` and
/// serde representation is lowercase hex, as required by the wire format
/// (event ids, pubkeys and signatures are all lowercase hex strings).
#[macro_export]
macro_rules! define_hex_array {
    (
        $(#[$outer:meta])*
        struct $t:tt, $n:literal
    ) => {
        $(#[$outer])*
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, bincode::Encode, bincode::Decode)]
        pub struct $t([u8; $n]);

        impl $t {
            pub const LEN: usize = $n;

            pub fn as_bytes(&self) -> &[u8; $n] {
                &self.0
            }

            pub fn from_bytes(bytes: [u8; $n]) -> Self {
                Self(bytes)
            }
        }

        impl std::fmt::Display for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                data_encoding::HEXLOWER.encode_write(&self.0, f)
            }
        }

        impl std::fmt::Debug for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({self})", stringify!($t))
            }
        }

        impl std::str::FromStr for $t {
            type Err = $crate::HexParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.len() != $n * 2 {
                    return Err($crate::HexParseError::WrongLength {
                        expected: $n * 2,
                        got: s.len(),
                    });
                }
                if !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
                    return Err($crate::HexParseError::NotLowercaseHex);
                }
                let decoded = data_encoding::HEXLOWER
                    .decode(s.as_bytes())
                    .map_err(|_| $crate::HexParseError::NotLowercaseHex)?;
                let array: [u8; $n] = decoded
                    .try_into()
                    .map_err(|_| $crate::HexParseError::WrongLength {
                        expected: $n,
                        got: s.len() / 2,
                    })?;
                Ok(Self(array))
            }
        }

        impl serde::Serialize for $t {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $t {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}
