//! Element codecs: little-endian byte access, f64 widening and the
//! per-element combine step used by reductions.

use crate::types::DataType;

/// bfloat16 bit pattern: the upper half of an f32.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Bf16(pub u16);

impl Bf16 {
    /// Round to nearest, ties to even. NaN stays quiet NaN.
    pub fn from_f32(v: f32) -> Self {
        let bits = v.to_bits();
        if v.is_nan() {
            return Bf16((bits >> 16) as u16 | 0x0040);
        }
        let lsb = (bits >> 16) & 1;
        Bf16((bits.wrapping_add(0x7FFF + lsb) >> 16) as u16)
    }

    pub fn to_f32(self) -> f32 {
        f32::from_bits(u32::from(self.0) << 16)
    }
}

/// binary16 bit pattern.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct F16(pub u16);

impl F16 {
    /// Out-of-range magnitudes saturate to infinity, tiny ones flush to
    /// (signed) zero.
    pub fn from_f32(v: f32) -> Self {
        let bits = v.to_bits();
        let sign = ((bits >> 16) & 0x8000) as u16;
        let exp = ((bits >> 23) & 0xFF) as i32;
        let man = bits & 0x007F_FFFF;

        let magnitude = match exp - 127 {
            _ if exp == 0xFF && man != 0 => 0x7E00,
            _ if exp == 0xFF => 0x7C00,
            e if e > 15 => 0x7C00,
            e if e < -24 => 0,
            e if e < -14 => ((man | 0x0080_0000) >> (-1 - e) as u32) as u16,
            e => {
                // Rounding may carry into the exponent; 0x7BFF + 1 is infinity.
                let h = (((e + 15) as u32) << 10 | man >> 13) + ((man >> 12) & 1);
                h as u16
            }
        };
        F16(sign | magnitude)
    }

    pub fn to_f32(self) -> f32 {
        let sign = u32::from(self.0 & 0x8000) << 16;
        let exp = u32::from((self.0 >> 10) & 0x1F);
        let man = u32::from(self.0 & 0x03FF);
        match (exp, man) {
            (0, 0) => f32::from_bits(sign),
            (0, m) => {
                let v = m as f32 * 2f32.powi(-24);
                if sign == 0 { v } else { -v }
            }
            (31, 0) => f32::from_bits(sign | 0x7F80_0000),
            (31, _) => f32::from_bits(sign | 0x7FC0_0000),
            (e, m) => f32::from_bits(sign | (e + 112) << 23 | m << 13),
        }
    }
}

/// How two elements are folded together by a reduction.
#[doc(hidden)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    Sum,
    Product,
    Min,
    Max,
}

/// A Rust type that can back a tensor of [`Element::DTYPE`].
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DataType;

    /// Decode from exactly `DTYPE.size_in_bytes()` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, bytes: &mut [u8]);
    fn to_f64(self) -> f64;
    /// Saturating conversion for integer types.
    fn from_f64(v: f64) -> Self;

    #[doc(hidden)]
    fn combine(a: Self, b: Self, how: Combine) -> Self;
}

macro_rules! le_array {
    ($bytes:expr, $n:expr) => {{
        let mut buf = [0u8; $n];
        buf.copy_from_slice(&$bytes[..$n]);
        buf
    }};
}

macro_rules! impl_element {
    (int: $($ty:ty => $dtype:ident),*) => {
        $(
            impl Element for $ty {
                const DTYPE: DataType = DataType::$dtype;

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    <$ty>::from_le_bytes(le_array!(bytes, std::mem::size_of::<$ty>()))
                }
                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_le_bytes());
                }
                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }
                #[inline]
                fn from_f64(v: f64) -> Self {
                    v.round() as $ty
                }
                #[inline]
                fn combine(a: Self, b: Self, how: Combine) -> Self {
                    match how {
                        Combine::Sum => a.wrapping_add(b),
                        Combine::Product => a.wrapping_mul(b),
                        Combine::Min => a.min(b),
                        Combine::Max => a.max(b),
                    }
                }
            }
        )*
    };
    (float: $($ty:ty => $dtype:ident),*) => {
        $(
            impl Element for $ty {
                const DTYPE: DataType = DataType::$dtype;

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    <$ty>::from_le_bytes(le_array!(bytes, std::mem::size_of::<$ty>()))
                }
                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_le_bytes());
                }
                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }
                #[inline]
                fn from_f64(v: f64) -> Self {
                    v as $ty
                }
                #[inline]
                fn combine(a: Self, b: Self, how: Combine) -> Self {
                    match how {
                        Combine::Sum => a + b,
                        Combine::Product => a * b,
                        Combine::Min => a.min(b),
                        Combine::Max => a.max(b),
                    }
                }
            }
        )*
    };
    (half: $($ty:ident => $dtype:ident),*) => {
        $(
            impl Element for $ty {
                const DTYPE: DataType = DataType::$dtype;

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    $ty(u16::from_le_bytes(le_array!(bytes, 2)))
                }
                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.0.to_le_bytes());
                }
                #[inline]
                fn to_f64(self) -> f64 {
                    self.to_f32() as f64
                }
                #[inline]
                fn from_f64(v: f64) -> Self {
                    $ty::from_f32(v as f32)
                }
                #[inline]
                fn combine(a: Self, b: Self, how: Combine) -> Self {
                    $ty::from_f32(f32::combine(a.to_f32(), b.to_f32(), how))
                }
            }
        )*
    };
}

impl_element!(int: i8 => I8, i16 => I16, i32 => I32, i64 => I64, u8 => U8, u32 => U32, u64 => U64);
impl_element!(float: f32 => F32, f64 => F64);
impl_element!(half: F16 => F16, Bf16 => BF16);

/// Run `$body` with `$T` bound to the Rust type behind `$dtype`.
macro_rules! with_element {
    ($dtype:expr, $T:ident => $body:expr) => {
        match $dtype {
            $crate::types::DataType::F32 => {
                type $T = f32;
                $body
            }
            $crate::types::DataType::F64 => {
                type $T = f64;
                $body
            }
            $crate::types::DataType::F16 => {
                type $T = $crate::tensor::F16;
                $body
            }
            $crate::types::DataType::BF16 => {
                type $T = $crate::tensor::Bf16;
                $body
            }
            $crate::types::DataType::I8 => {
                type $T = i8;
                $body
            }
            $crate::types::DataType::I16 => {
                type $T = i16;
                $body
            }
            $crate::types::DataType::I32 => {
                type $T = i32;
                $body
            }
            $crate::types::DataType::I64 => {
                type $T = i64;
                $body
            }
            $crate::types::DataType::U8 => {
                type $T = u8;
                $body
            }
            $crate::types::DataType::U32 => {
                type $T = u32;
                $body
            }
            $crate::types::DataType::U64 => {
                type $T = u64;
                $body
            }
        }
    };
}

pub(crate) use with_element;
