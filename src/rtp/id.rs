#![allow(missing_docs)]

use std::fmt;
use std::ops::Deref;
use std::str::from_utf8;

use serde::{Deserialize, Serialize};

macro_rules! str_id {
    ($id:ident, $name:literal, $num:tt) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub struct $id([u8; $num]);

        impl $id {
            pub const fn from_array(a: [u8; $num]) -> $id {
                $id(a)
            }
        }

        impl fmt::Display for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s: &str = self;
                write!(f, "{}", s)
            }
        }

        impl fmt::Debug for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s: &str = self;
                write!(f, "{}({})", $name, s)
            }
        }

        impl Deref for $id {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                // Only ascii alphanumerics and padding ever go in, see From<&str>.
                from_utf8(&self.0).unwrap_or_default().trim()
            }
        }

        impl<'a> From<&'a str> for $id {
            fn from(v: &'a str) -> Self {
                let v = v
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                    .collect::<String>();

                let bytes = v.as_bytes();
                let bytes = &bytes[0..$num.min(bytes.len())];

                // pad with space.
                let mut array = [b' '; $num];

                let max = bytes.len().min(array.len());
                array[0..max].copy_from_slice(bytes);

                $id(array)
            }
        }

        impl From<String> for $id {
            fn from(v: String) -> Self {
                $id::from(v.as_str())
            }
        }

        impl From<$id> for String {
            fn from(v: $id) -> Self {
                v.to_string()
            }
        }
    };
}

macro_rules! num_id {
    ($id:ident, $t:ty) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $id($t);

        impl $id {
            pub const fn new_with_value(v: $t) -> Self {
                $id(v)
            }
        }

        impl Deref for $id {
            type Target = $t;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<$t> for $id {
            fn from(v: $t) -> Self {
                $id(v)
            }
        }

        impl fmt::Display for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

str_id!(Rid, "Rid", 8);
num_id!(Ssrc, u32);
num_id!(Pt, u8);
num_id!(SeqNo, u64);

num_id!(ProducerId, u64);

impl ProducerId {
    /// Creates a new random id.
    pub fn new() -> Self {
        ProducerId(fastrand::u64(..))
    }
}

impl SeqNo {
    /// The 16 bit RTP sequence number this extended number corresponds to.
    pub fn as_u16(&self) -> u16 {
        self.0 as u16
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rid_from_str_pads_and_sanitizes() {
        let rid: Rid = "hi-1".into();
        assert_eq!(&*rid, "hi_1");
        assert_eq!(format!("{:?}", rid), "Rid(hi_1)");

        let long: Rid = "abcdefghijkl".into();
        assert_eq!(&*long, "abcdefgh");
    }

    #[test]
    fn seq_no_as_u16() {
        let s: SeqNo = 65_536.into();
        assert_eq!(s.as_u16(), 0);
        assert_eq!(SeqNo::from(65_539).as_u16(), 3);
    }
}
