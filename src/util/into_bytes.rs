use std::borrow::Cow;

/// Conversion into a little-endian byte run, borrowed where possible.
///
/// The embed helpers and [`ConstPool::add_value`] take anything
/// implementing this, so callers pass slices, strings, or plain
/// integers without staging a buffer first.
///
/// [`ConstPool::add_value`]: crate::const_pool::ConstPool::add_value
pub trait IntoBytes<'a> {
    #[must_use]
    fn into_bytes(self) -> Cow<'a, [u8]>;
}

/// Anything already byte-shaped borrows straight through: slices,
/// arrays, `Vec<u8>`, strings.
impl<'a, T: AsRef<[u8]> + ?Sized> IntoBytes<'a> for &'a T {
    #[inline(always)]
    fn into_bytes(self) -> Cow<'a, [u8]> {
        Cow::Borrowed(self.as_ref())
    }
}

macro_rules! into_bytes_le {
    ($($int: ty),+ $(,)?) => {
        $(
            impl<'a> IntoBytes<'a> for $int {
                #[inline(always)]
                fn into_bytes(self) -> Cow<'a, [u8]> {
                    Cow::Owned(self.to_le_bytes().to_vec())
                }
            }
        )+
    };
}

into_bytes_le!(u8, u16, u32, u64, i8, i16, i32, i64);
