//! Tensor element types and shapes.

use std::fmt;
use std::str::FromStr;

use crate::expr::SizeExpr;

/// Nominal widths at or above this flag encode sub-byte-packed types:
/// the effective byte width is the nominal width minus the flag.
pub const SUB_BYTE_FLAG: u32 = 0x80;

/// Element data type of a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 32-bit floating point.
    F32,
    /// 16-bit floating point.
    F16,
    /// Brain floating point (16-bit).
    BF16,
    /// 32-bit signed integer.
    I32,
    /// 8-bit signed integer.
    I8,
    /// 8-bit unsigned integer.
    U8,
    /// 4-bit signed integer, packed two per byte.
    I4,
    /// 4-bit unsigned integer, packed two per byte.
    U4,
    /// Boolean, stored as one byte.
    Bool,
}

impl DataType {
    /// Nominal width from the data-type table. Sub-byte types carry
    /// [`SUB_BYTE_FLAG`] so they stay distinguishable from true one-byte
    /// types.
    pub fn nominal_width(self) -> u32 {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F16 | DataType::BF16 => 2,
            DataType::I8 | DataType::U8 | DataType::Bool => 1,
            DataType::I4 | DataType::U4 => SUB_BYTE_FLAG + 1,
        }
    }

    /// Effective storage width in bytes, with the sub-byte packing
    /// correction applied.
    pub fn byte_width(self) -> u32 {
        let nominal = self.nominal_width();
        if nominal >= SUB_BYTE_FLAG {
            nominal - SUB_BYTE_FLAG
        } else {
            nominal
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataType::F32 => "f32",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
            DataType::I32 => "i32",
            DataType::I8 => "i8",
            DataType::U8 => "u8",
            DataType::I4 => "i4",
            DataType::U4 => "u4",
            DataType::Bool => "bool",
        })
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "f32" => Ok(DataType::F32),
            "f16" => Ok(DataType::F16),
            "bf16" => Ok(DataType::BF16),
            "i32" => Ok(DataType::I32),
            "i8" => Ok(DataType::I8),
            "u8" => Ok(DataType::U8),
            "i4" => Ok(DataType::I4),
            "u4" => Ok(DataType::U4),
            "bool" => Ok(DataType::Bool),
            other => Err(format!("unknown data type '{other}'")),
        }
    }
}

/// A single tensor dimension: fixed extent or a named dynamic symbol.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dim {
    /// Known extent.
    Fixed(u64),
    /// Dynamic extent identified by a symbol name (e.g. batch `"N"`).
    Sym(String),
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{n}"),
            Dim::Sym(s) => f.write_str(s),
        }
    }
}

/// Tensor shape: an ordered list of dimensions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorShape {
    /// Dimensions, outermost first.
    pub dims: Vec<Dim>,
}

impl TensorShape {
    /// Total element count as a size expression. A rank-0 shape counts
    /// as a single element.
    pub fn element_count(&self) -> SizeExpr {
        self.dims
            .iter()
            .fold(SizeExpr::Const(1), |acc, d| match d {
                Dim::Fixed(n) => acc.mul(SizeExpr::Const(*n as i64)),
                Dim::Sym(s) => acc.mul(SizeExpr::Sym(s.clone())),
            })
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str("x")?;
            }
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_widths() {
        assert_eq!(DataType::F32.byte_width(), 4);
        assert_eq!(DataType::F16.byte_width(), 2);
        assert_eq!(DataType::BF16.byte_width(), 2);
        assert_eq!(DataType::I8.byte_width(), 1);
        assert_eq!(DataType::Bool.byte_width(), 1);
    }

    #[test]
    fn sub_byte_correction() {
        // Packed types carry the flag in their nominal width but resolve
        // to one storage byte.
        assert!(DataType::I4.nominal_width() >= SUB_BYTE_FLAG);
        assert_eq!(DataType::I4.byte_width(), 1);
        assert_eq!(DataType::U4.byte_width(), 1);
    }

    #[test]
    fn fixed_element_count() {
        let shape = TensorShape {
            dims: vec![Dim::Fixed(10), Dim::Fixed(20)],
        };
        assert_eq!(shape.element_count().as_const(), Some(200));
    }

    #[test]
    fn symbolic_element_count() {
        let shape = TensorShape {
            dims: vec![Dim::Sym("N".into()), Dim::Fixed(768)],
        };
        let count = shape.element_count();
        assert_eq!(count.as_const(), None);
        assert_eq!(count.to_string(), "N*768");
    }

    #[test]
    fn scalar_shape() {
        let shape = TensorShape { dims: vec![] };
        assert_eq!(shape.element_count().as_const(), Some(1));
    }

    #[test]
    fn datatype_round_trip() {
        for dt in [
            DataType::F32,
            DataType::F16,
            DataType::BF16,
            DataType::I32,
            DataType::I8,
            DataType::U8,
            DataType::I4,
            DataType::U4,
            DataType::Bool,
        ] {
            assert_eq!(dt.to_string().parse::<DataType>(), Ok(dt));
        }
        assert!("f64".parse::<DataType>().is_err());
    }
}
