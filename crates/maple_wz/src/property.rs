//! Property values stored in images

use std::fmt;

use crate::bitmap::Bitmap;
use crate::sound::Sound;

/// Property list type tags
pub mod tag {
    /// No value
    pub const NULL: u8 = 0;
    /// 16 bit integer
    pub const SHORT: u8 = 2;
    /// Compressed 32 bit integer
    pub const INT: u8 = 3;
    /// 32 bit float, zero stored as a single byte
    pub const FLOAT: u8 = 4;
    /// 64 bit float
    pub const DOUBLE: u8 = 5;
    /// String block
    pub const STRING: u8 = 8;
    /// Length prefixed extended property
    pub const EXTENDED: u8 = 9;
    /// Alternative 16 bit integer tag
    pub const SHORT_ALT: u8 = 11;
    /// Alternative compressed 32 bit integer tag
    pub const INT_ALT: u8 = 19;
    /// Compressed 64 bit integer
    pub const LONG: u8 = 20;

    /// Float sub-tag for zero
    pub const FLOAT_ZERO: u8 = 0x00;
    /// Float sub-tag for a stored value
    pub const FLOAT_VALUE: u8 = 0x80;
}

/// Extended property names
pub mod extended {
    /// Nested property list
    pub const PROPERTY: &str = "Property";
    /// Bitmap with an optional property list
    pub const CANVAS: &str = "Canvas";
    /// Pair of integers
    pub const VECTOR: &str = "Shape2D#Vector2D";
    /// List of extended properties
    pub const CONVEX: &str = "Shape2D#Convex2D";
    /// Audio clip
    pub const SOUND: &str = "Sound_DX8";
    /// Path alias
    pub const UOL: &str = "UOL";
    /// Opaque bytes
    pub const RAW_DATA: &str = "RawData";
}

/// Bytes either still in the source stream or held in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// `len` bytes at `offset` of the source stream
    Stored {
        /// Absolute offset
        offset: u64,
        /// Length in bytes
        len: usize,
    },
    /// Bytes held in memory
    Loaded(Vec<u8>),
}

impl Payload {
    /// Length in bytes
    pub fn len(&self) -> usize {
        match self {
            Payload::Stored { len, .. } => *len,
            Payload::Loaded(bytes) => bytes.len(),
        }
    }

    /// Whether the payload holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pair of integers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Point {
    /// Horizontal component
    pub x: i32,
    /// Vertical component
    pub y: i32,
}

/// Path segment naming the horizontal component of a vector
pub const VECTOR_X: &str = "X";

/// Path segment naming the vertical component of a vector
pub const VECTOR_Y: &str = "Y";

impl Point {
    /// Creates a point
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Component named `X` or `Y`, ignoring case, with its canonical name
    pub fn coordinate(&self, name: &str) -> Option<(&'static str, i32)> {
        if name.eq_ignore_ascii_case(VECTOR_X) {
            Some((VECTOR_X, self.x))
        } else if name.eq_ignore_ascii_case(VECTOR_Y) {
            Some((VECTOR_Y, self.y))
        } else {
            None
        }
    }

    /// Replaces the component named `X` or `Y`, returning false for other names
    pub fn set_coordinate(&mut self, name: &str, value: i32) -> bool {
        if name.eq_ignore_ascii_case(VECTOR_X) {
            self.x = value;
        } else if name.eq_ignore_ascii_case(VECTOR_Y) {
            self.y = value;
        } else {
            return false;
        }
        true
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X: {}, Y: {}", self.x, self.y)
    }
}

/// Value of a property node
///
/// Children of container variants are separate nodes of the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// No value
    Null,
    /// 16 bit integer
    Short(i16),
    /// 32 bit integer
    Int(i32),
    /// 64 bit integer
    Long(i64),
    /// 32 bit float
    Float(f32),
    /// 64 bit float
    Double(f64),
    /// Text
    String(String),
    /// Named children
    SubProperty,
    /// Named children and a bitmap
    Canvas(Bitmap),
    /// Pair of integers
    Vector(Point),
    /// Ordered extended properties
    Convex,
    /// Audio clip
    Sound(Sound),
    /// Opaque bytes
    RawData(Payload),
    /// Path to another property, relative to the parent of this one
    Uol(String),
}

impl PropertyValue {
    /// Name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            PropertyValue::Null => "null",
            PropertyValue::Short(_) => "short",
            PropertyValue::Int(_) => "int",
            PropertyValue::Long(_) => "long",
            PropertyValue::Float(_) => "float",
            PropertyValue::Double(_) => "double",
            PropertyValue::String(_) => "string",
            PropertyValue::SubProperty => "property",
            PropertyValue::Canvas(_) => "canvas",
            PropertyValue::Vector(_) => "vector",
            PropertyValue::Convex => "convex",
            PropertyValue::Sound(_) => "sound",
            PropertyValue::RawData(_) => "raw",
            PropertyValue::Uol(_) => "uol",
        }
    }

    /// Whether the variant can hold child properties
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            PropertyValue::SubProperty | PropertyValue::Canvas(_) | PropertyValue::Convex
        )
    }

    /// Whether the variant is stored as a length prefixed extended property
    pub fn is_extended(&self) -> bool {
        matches!(
            self,
            PropertyValue::SubProperty
                | PropertyValue::Canvas(_)
                | PropertyValue::Vector(_)
                | PropertyValue::Convex
                | PropertyValue::Sound(_)
                | PropertyValue::RawData(_)
                | PropertyValue::Uol(_)
        )
    }

    /// Value as a 64 bit integer, if it is numeric
    pub fn to_long(&self) -> Option<i64> {
        match self {
            PropertyValue::Short(v) => Some(*v as i64),
            PropertyValue::Int(v) => Some(*v as i64),
            PropertyValue::Long(v) => Some(*v),
            PropertyValue::Float(v) => Some(*v as i64),
            PropertyValue::Double(v) => Some(*v as i64),
            PropertyValue::String(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    /// Value as a 32 bit integer, if it is numeric
    pub fn to_int(&self) -> Option<i32> {
        match self {
            PropertyValue::String(v) => v.trim().parse().ok(),
            PropertyValue::Float(v) => Some(*v as i32),
            PropertyValue::Double(v) => Some(*v as i32),
            other => other.to_long().map(|v| v as i32),
        }
    }

    /// Value as a 16 bit integer, if it is numeric
    pub fn to_short(&self) -> Option<i16> {
        match self {
            PropertyValue::String(v) => v.trim().parse().ok(),
            other => other.to_int().map(|v| v as i16),
        }
    }

    /// Value as a 64 bit float, if it is numeric
    pub fn to_double(&self) -> Option<f64> {
        match self {
            PropertyValue::Short(v) => Some(*v as f64),
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::Long(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v as f64),
            PropertyValue::Double(v) => Some(*v),
            PropertyValue::String(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    /// Value as a 32 bit float, if it is numeric
    pub fn to_float(&self) -> Option<f32> {
        self.to_double().map(|v| v as f32)
    }

    /// Value rendered as text, if it has a textual form
    pub fn to_text(&self) -> Option<String> {
        match self {
            PropertyValue::Short(v) => Some(v.to_string()),
            PropertyValue::Int(v) => Some(v.to_string()),
            PropertyValue::Long(v) => Some(v.to_string()),
            PropertyValue::Float(v) => Some(v.to_string()),
            PropertyValue::Double(v) => Some(v.to_string()),
            PropertyValue::String(v) => Some(v.clone()),
            PropertyValue::Vector(p) => Some(p.to_string()),
            PropertyValue::Uol(path) => Some(path.clone()),
            _ => None,
        }
    }

    /// Value as a point, if it is a vector
    pub fn to_point(&self) -> Option<Point> {
        match self {
            PropertyValue::Vector(p) => Some(*p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{Point, PropertyValue};

    #[test]
    fn coordinates_by_name() {
        let mut point = Point::new(-4, 12);
        assert_eq!(point.coordinate("X"), Some(("X", -4)));
        assert_eq!(point.coordinate("y"), Some(("Y", 12)));
        assert_eq!(point.coordinate("z"), None);

        assert!(point.set_coordinate("x", 7));
        assert!(!point.set_coordinate("origin", 1));
        assert_eq!(point, Point::new(7, 12));
    }

    #[test]
    fn numeric_conversions_cast() {
        assert_eq!(PropertyValue::Short(-3).to_int(), Some(-3));
        assert_eq!(PropertyValue::Int(70000).to_short(), Some(70000i32 as i16));
        assert_eq!(PropertyValue::Long(1 << 40).to_int(), Some(0));
        assert_eq!(PropertyValue::Double(2.75).to_int(), Some(2));
        assert_eq!(PropertyValue::Float(1.5).to_double(), Some(1.5));
        assert_eq!(PropertyValue::Int(7).to_float(), Some(7.0));
    }

    #[test]
    fn strings_parse_or_fail() {
        assert_eq!(PropertyValue::String(" 42 ".into()).to_int(), Some(42));
        assert_eq!(PropertyValue::String("4.5".into()).to_double(), Some(4.5));
        assert_eq!(PropertyValue::String("abc".into()).to_int(), None);
        assert_eq!(PropertyValue::Vector(Point::new(1, 2)).to_int(), None);
    }

    #[test]
    fn text_forms() {
        assert_eq!(PropertyValue::Int(5).to_text().as_deref(), Some("5"));
        assert_eq!(
            PropertyValue::Vector(Point::new(-1, 4)).to_text().as_deref(),
            Some("X: -1, Y: 4")
        );
        assert_eq!(PropertyValue::SubProperty.to_text(), None);
    }

    #[test]
    fn container_and_extended_kinds() {
        assert!(PropertyValue::Convex.is_container());
        assert!(!PropertyValue::Vector(Point::default()).is_container());
        assert!(PropertyValue::Uol("../a".into()).is_extended());
        assert!(!PropertyValue::String("a".into()).is_extended());
    }
}
