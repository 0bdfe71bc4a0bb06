//! Color Value Model - RGB/RGBA Values and Blend Encoding
//!
//! Channels are range-checked once, at construction. After that a color is an
//! immutable `Copy` value; every operation returns a new one.

use std::fmt;

use thiserror::Error;

use crate::error::ErrorKind;

/// Constant flag carried by every encoded blend value.
pub const BLEND_FLAG: i64 = 0x20000;

/// Offset subtracted by [`ColorValue::negative`].
pub const NEGATIVE_OFFSET: i64 = 0x100_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Red,
    Green,
    Blue,
    Alpha,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Red => "red",
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Alpha => "alpha",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Rgb,
    Rgba,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rgb => f.write_str("RGB"),
            Self::Rgba => f.write_str("RGBA"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ColorError {
    #[error("{channel} channel value {value} is outside 0..=255")]
    ChannelRange { channel: Channel, value: i64 },

    #[error("value {value} does not fit within {channels} channels")]
    PackedRange { value: i64, channels: u8 },

    #[error("invalid channel count {0}, expected 3 or 4")]
    InvalidChannels(i64),

    #[error("blend fraction {0} must be between 0.0 and 1.0")]
    FractionRange(f64),

    #[error("unknown blend mode `{0}`, expected one of: normal, add, dodge, multiply, overlay, hsv")]
    UnknownBlendMode(String),

    #[error("{method}() cannot be applied to an {found} color")]
    TypeMismatch { method: &'static str, found: Shape },

    #[error("cannot {op} an {left} color and an {right} color")]
    ShapeMismatch {
        op: &'static str,
        left: Shape,
        right: Shape,
    },
}

impl ColorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ChannelRange { .. } | Self::PackedRange { .. } | Self::InvalidChannels(_) => {
                ErrorKind::ChannelRange
            }
            Self::FractionRange(_) => ErrorKind::FractionRange,
            Self::UnknownBlendMode(_) => ErrorKind::UnknownBlendMode,
            Self::TypeMismatch { .. } | Self::ShapeMismatch { .. } => ErrorKind::TypeMismatch,
        }
    }
}

fn channel(channel: Channel, value: i64) -> Result<u8, ColorError> {
    u8::try_from(value).map_err(|_| ColorError::ChannelRange { channel, value })
}

/// A theme color. Printed into output text as its packed serialization,
/// red in the least significant byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorValue {
    Rgb { r: u8, g: u8, b: u8 },
    Rgba { r: u8, g: u8, b: u8, a: u8 },
}

impl ColorValue {
    pub fn rgb(r: i64, g: i64, b: i64) -> Result<Self, ColorError> {
        Ok(Self::Rgb {
            r: channel(Channel::Red, r)?,
            g: channel(Channel::Green, g)?,
            b: channel(Channel::Blue, b)?,
        })
    }

    pub fn rgba(r: i64, g: i64, b: i64, a: i64) -> Result<Self, ColorError> {
        Ok(Self::Rgba {
            r: channel(Channel::Red, r)?,
            g: channel(Channel::Green, g)?,
            b: channel(Channel::Blue, b)?,
            a: channel(Channel::Alpha, a)?,
        })
    }

    /// Unpack `value` least-significant byte first. Without an explicit channel
    /// count, 3 is assumed unless the value needs a fourth byte.
    pub fn from_packed(value: i64, channels: Option<i64>) -> Result<Self, ColorError> {
        let channels = match channels {
            Some(n) => n,
            None if value > 0xFF_FFFF => 4,
            None => 3,
        };
        let limit = match channels {
            3 => 0xFF_FFFF,
            4 => 0xFFFF_FFFF,
            other => return Err(ColorError::InvalidChannels(other)),
        };
        if !(0..=limit).contains(&value) {
            return Err(ColorError::PackedRange {
                value,
                channels: channels as u8,
            });
        }

        let byte = |shift: u32| ((value >> shift) & 0xFF) as u8;
        Ok(match channels {
            3 => Self::Rgb {
                r: byte(0),
                g: byte(8),
                b: byte(16),
            },
            _ => Self::Rgba {
                r: byte(0),
                g: byte(8),
                b: byte(16),
                a: byte(24),
            },
        })
    }

    pub fn shape(&self) -> Shape {
        match self {
            Self::Rgb { .. } => Shape::Rgb,
            Self::Rgba { .. } => Shape::Rgba,
        }
    }

    /// `r + g*256 + b*65536 (+ a*16777216)`
    pub fn packed(&self) -> i64 {
        match *self {
            Self::Rgb { r, g, b } => i64::from(r) | i64::from(g) << 8 | i64::from(b) << 16,
            Self::Rgba { r, g, b, a } => {
                i64::from(r) | i64::from(g) << 8 | i64::from(b) << 16 | i64::from(a) << 24
            }
        }
    }

    pub fn arr(&self) -> String {
        match self {
            Self::Rgb { r, g, b } => format!("{} {} {}", r, g, b),
            Self::Rgba { r, g, b, a } => format!("{} {} {} {}", r, g, b, a),
        }
    }

    pub fn hex(&self) -> String {
        match self {
            Self::Rgb { .. } => format!("{:06X}", self.packed()),
            Self::Rgba { .. } => format!("{:08X}", self.packed()),
        }
    }

    /// Promote to RGBA, or replace the alpha of an RGBA value.
    pub fn with_alpha(&self, alpha: i64) -> Result<Self, ColorError> {
        let a = channel(Channel::Alpha, alpha)?;
        Ok(match *self {
            Self::Rgb { r, g, b } | Self::Rgba { r, g, b, .. } => Self::Rgba { r, g, b, a },
        })
    }

    /// Used for toggle-style theme keys; RGB only.
    pub fn negative(&self) -> Result<i64, ColorError> {
        match self {
            Self::Rgb { .. } => Ok(self.packed() - NEGATIVE_OFFSET),
            Self::Rgba { .. } => Err(ColorError::TypeMismatch {
                method: "negative",
                found: Shape::Rgba,
            }),
        }
    }

    pub fn to_rgb(&self) -> Result<Self, ColorError> {
        match *self {
            Self::Rgba { r, g, b, .. } => Ok(Self::Rgb { r, g, b }),
            Self::Rgb { .. } => Err(ColorError::TypeMismatch {
                method: "to_rgb",
                found: Shape::Rgb,
            }),
        }
    }

    pub fn checked_add(&self, other: &Self) -> Result<Self, ColorError> {
        self.combine(other, "add", |x, y| i64::from(x) + i64::from(y))
    }

    pub fn checked_sub(&self, other: &Self) -> Result<Self, ColorError> {
        self.combine(other, "subtract", |x, y| i64::from(x) - i64::from(y))
    }

    fn combine(
        &self,
        other: &Self,
        op: &'static str,
        f: impl Fn(u8, u8) -> i64,
    ) -> Result<Self, ColorError> {
        match (*self, *other) {
            (Self::Rgb { r, g, b }, Self::Rgb { r: r2, g: g2, b: b2 }) => {
                Self::rgb(f(r, r2), f(g, g2), f(b, b2))
            }
            (
                Self::Rgba { r, g, b, a },
                Self::Rgba {
                    r: r2,
                    g: g2,
                    b: b2,
                    a: a2,
                },
            ) => Self::rgba(f(r, r2), f(g, g2), f(b, b2), f(a, a2)),
            (left, right) => Err(ColorError::ShapeMismatch {
                op,
                left: left.shape(),
                right: right.shape(),
            }),
        }
    }
}

impl fmt::Display for ColorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.packed())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Normal,
    Add,
    Dodge,
    Multiply,
    Overlay,
    Hsv,
}

impl BlendMode {
    pub const ALL: [BlendMode; 6] = [
        Self::Normal,
        Self::Add,
        Self::Dodge,
        Self::Multiply,
        Self::Overlay,
        Self::Hsv,
    ];

    pub fn from_name(name: &str) -> Result<Self, ColorError> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.name() == name)
            .ok_or_else(|| ColorError::UnknownBlendMode(name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Add => "add",
            Self::Dodge => "dodge",
            Self::Multiply => "multiply",
            Self::Overlay => "overlay",
            Self::Hsv => "hsv",
        }
    }

    /// Low byte of the encoded value
    pub fn code(&self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::Add => 1,
            Self::Dodge => 2,
            Self::Multiply => 3,
            Self::Overlay => 4,
            Self::Hsv => 254,
        }
    }
}

/// Pack a blend mode and opacity fraction into one theme value.
///
/// Layout, from the top: the constant flag bit, nine bits of `fraction * 256`,
/// then the mode code in the low byte.
pub fn blend(mode: &str, fraction: f64) -> Result<i64, ColorError> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(ColorError::FractionRange(fraction));
    }
    let mode = BlendMode::from_name(mode)?;
    let steps = (fraction * 256.0).round() as i64;
    Ok(BLEND_FLAG + (steps << 8) + mode.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_serialization() {
        let color = ColorValue::rgb(11, 22, 33).unwrap();
        assert_eq!(color.packed(), 2168331);
        assert_eq!(color.to_string(), "2168331");

        let color = ColorValue::rgba(11, 22, 33, 44).unwrap();
        assert_eq!(color.packed(), 11 + 22 * 256 + 33 * 65536 + 44 * 16777216);
    }

    #[test]
    fn test_arr() {
        assert_eq!(ColorValue::rgb(11, 22, 33).unwrap().arr(), "11 22 33");
        assert_eq!(ColorValue::rgba(11, 22, 33, 44).unwrap().arr(), "11 22 33 44");
    }

    #[test]
    fn test_channel_range() {
        for bad in [256, -1] {
            let err = ColorValue::rgb(bad, 0, 0).unwrap_err();
            assert_eq!(
                err,
                ColorError::ChannelRange {
                    channel: Channel::Red,
                    value: bad
                }
            );
            assert_eq!(err.kind(), ErrorKind::ChannelRange);
        }
        assert!(ColorValue::rgba(0, 0, 0, 300).is_err());
        assert!(ColorValue::rgb(0, 0, 255).is_ok());
    }

    #[test]
    fn test_from_packed_lsb_first() {
        assert_eq!(
            ColorValue::from_packed(0x332211, None).unwrap(),
            ColorValue::rgb(0x11, 0x22, 0x33).unwrap()
        );
        assert_eq!(
            ColorValue::from_packed(0x44332211, None).unwrap(),
            ColorValue::rgba(0x11, 0x22, 0x33, 0x44).unwrap()
        );
        assert_eq!(
            ColorValue::from_packed(0xFFFFFF, Some(4)).unwrap(),
            ColorValue::rgba(255, 255, 255, 0).unwrap()
        );
        assert!(matches!(
            ColorValue::from_packed(0x1000000, Some(3)),
            Err(ColorError::PackedRange { channels: 3, .. })
        ));
        assert!(matches!(
            ColorValue::from_packed(1, Some(5)),
            Err(ColorError::InvalidChannels(5))
        ));
        assert!(ColorValue::from_packed(-1, None).is_err());
    }

    #[test]
    fn test_alpha_round_trip() {
        let color = ColorValue::rgb(1, 2, 3).unwrap();
        let promoted = color.with_alpha(9).unwrap();
        assert_eq!(promoted, ColorValue::rgba(1, 2, 3, 9).unwrap());
        assert_eq!(promoted.to_rgb().unwrap(), color);

        let replaced = promoted.with_alpha(200).unwrap();
        assert_eq!(replaced, ColorValue::rgba(1, 2, 3, 200).unwrap());
        assert!(color.with_alpha(256).is_err());
    }

    #[test]
    fn test_shape_specific_methods() {
        let rgb = ColorValue::rgb(11, 22, 33).unwrap();
        assert_eq!(rgb.negative().unwrap(), 2168331 - 0x1000000);
        assert_eq!(
            rgb.to_rgb().unwrap_err().kind(),
            ErrorKind::TypeMismatch
        );

        let rgba = rgb.with_alpha(1).unwrap();
        assert_eq!(
            rgba.negative().unwrap_err(),
            ColorError::TypeMismatch {
                method: "negative",
                found: Shape::Rgba
            }
        );
    }

    #[test]
    fn test_hex() {
        assert_eq!(ColorValue::rgb(0x11, 0x22, 0x33).unwrap().hex(), "332211");
        assert_eq!(ColorValue::rgba(1, 2, 3, 0xAB).unwrap().hex(), "AB030201");
    }

    #[test]
    fn test_channel_arithmetic() {
        let a = ColorValue::rgb(10, 20, 30).unwrap();
        let b = ColorValue::rgb(1, 2, 3).unwrap();
        assert_eq!(a.checked_add(&b).unwrap(), ColorValue::rgb(11, 22, 33).unwrap());
        assert_eq!(a.checked_sub(&b).unwrap(), ColorValue::rgb(9, 18, 27).unwrap());
        assert_eq!(
            b.checked_sub(&a).unwrap_err().kind(),
            ErrorKind::ChannelRange
        );

        let rgba = b.with_alpha(5).unwrap();
        assert!(matches!(
            a.checked_add(&rgba),
            Err(ColorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_blend_encoding() {
        assert_eq!(blend("normal", 0.598).unwrap(), 170240);
        assert_eq!(blend("normal", 0.0).unwrap(), 0b10_0000_0000_0000_0000);
        assert_eq!(blend("normal", 1.0).unwrap(), 0b11_0000_0000_0000_0000);
        assert_eq!(blend("hsv", 0.12).unwrap(), 0b10_0001_1111_1111_1110);
    }

    #[test]
    fn test_blend_errors() {
        assert_eq!(
            blend("normal", 1.5).unwrap_err().kind(),
            ErrorKind::FractionRange
        );
        assert_eq!(
            blend("normal", -0.1).unwrap_err().kind(),
            ErrorKind::FractionRange
        );
        assert!(blend("normal", f64::NAN).is_err());
        assert_eq!(
            blend("screen", 0.5).unwrap_err(),
            ColorError::UnknownBlendMode("screen".to_string())
        );
    }
}
