use alloc::borrow::Cow;
use alloc::string::String;
use alloc::vec::Vec;

/// Types that can be viewed as a sequence of bytes.
///
/// # Examples
///
/// ```rust
/// # use evac_map::AsBytes;
/// # use std::borrow::Cow;
/// #
/// assert!(matches!("abc".byte_view(), Cow::Borrowed(b"abc")));
/// assert_eq!(0x0102u16.byte_view().into_owned(), [0x02, 0x01]);
/// assert_eq!([1u32, 2].byte_view().len(), 8);
/// ```
pub trait AsBytes {
    /// Returns the bytes of `self`, borrowed when the value already is a
    /// byte sequence.
    fn byte_view(&self) -> Cow<'_, [u8]>;
}

impl<T: AsBytes + ?Sized> AsBytes for &T {
    fn byte_view(&self) -> Cow<'_, [u8]> {
        (**self).byte_view()
    }
}

impl AsBytes for [u8] {
    fn byte_view(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self)
    }
}

impl<const N: usize> AsBytes for [u8; N] {
    fn byte_view(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self)
    }
}

impl AsBytes for Vec<u8> {
    fn byte_view(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self)
    }
}

impl AsBytes for str {
    fn byte_view(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl AsBytes for String {
    fn byte_view(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl AsBytes for () {
    fn byte_view(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&[])
    }
}

impl AsBytes for bool {
    fn byte_view(&self) -> Cow<'_, [u8]> {
        Cow::Owned(alloc::vec![u8::from(*self)])
    }
}

impl AsBytes for char {
    fn byte_view(&self) -> Cow<'_, [u8]> {
        Cow::Owned(u32::from(*self).to_le_bytes().to_vec())
    }
}

macro_rules! le_bytes {
    ($($t:ty),* $(,)?) => {
        $(
            impl AsBytes for $t {
                fn byte_view(&self) -> Cow<'_, [u8]> {
                    Cow::Owned(self.to_le_bytes().to_vec())
                }
            }

            impl AsBytes for [$t] {
                fn byte_view(&self) -> Cow<'_, [u8]> {
                    let mut bytes = Vec::with_capacity(core::mem::size_of_val(self));
                    for x in self {
                        bytes.extend_from_slice(&x.to_le_bytes());
                    }
                    Cow::Owned(bytes)
                }
            }

            impl<const N: usize> AsBytes for [$t; N] {
                fn byte_view(&self) -> Cow<'_, [u8]> {
                    self.as_slice().byte_view()
                }
            }

            impl AsBytes for Vec<$t> {
                fn byte_view(&self) -> Cow<'_, [u8]> {
                    self.as_slice().byte_view()
                }
            }
        )*
    };
}

le_bytes!(
    u16, u32, u64, u128, usize, i16, i32, i64, i128, isize, f32, f64,
);

impl AsBytes for u8 {
    fn byte_view(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(core::slice::from_ref(self))
    }
}

impl AsBytes for i8 {
    fn byte_view(&self) -> Cow<'_, [u8]> {
        Cow::Owned(self.to_le_bytes().to_vec())
    }
}
