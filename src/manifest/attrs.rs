//! Attribute-list lexing and formatting shared by the parser and serializer.
//!
//! An attribute list is a comma-separated sequence of `KEY=VALUE` pairs where
//! VALUE is an unquoted token, a quoted string (no escapes, commas allowed
//! inside quotes), a `WxH` resolution, or an `0x`-prefixed hex sequence.

use super::parse::ParseError;
use super::types::{ByteRange, Resolution};
use std::fmt::Write;

/// A raw attribute value with its quoting preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Quoted(String),
    Token(String),
}

impl AttrValue {
    pub fn as_str(&self) -> &str {
        match self {
            AttrValue::Quoted(s) | AttrValue::Token(s) => s,
        }
    }
}

/// Split an attribute list into `(KEY, VALUE)` pairs in declaration order.
///
/// Tolerates whitespace around `=` and after commas.
pub fn split_attributes(input: &str, line: usize) -> Result<Vec<(String, AttrValue)>, ParseError> {
    let mut out = Vec::new();
    let bytes = input.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        // skip separators
        while pos < bytes.len() && (bytes[pos] == b',' || bytes[pos].is_ascii_whitespace()) {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        let key_start = pos;
        while pos < bytes.len() && bytes[pos] != b'=' {
            pos += 1;
        }
        if pos >= bytes.len() {
            return Err(ParseError::UnexpectedToken {
                line,
                col: key_start + 1,
            });
        }
        let key = input[key_start..pos].trim().to_string();
        if key.is_empty() {
            return Err(ParseError::UnexpectedToken {
                line,
                col: key_start + 1,
            });
        }
        pos += 1; // consume '='
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }

        if pos < bytes.len() && bytes[pos] == b'"' {
            pos += 1;
            let val_start = pos;
            while pos < bytes.len() && bytes[pos] != b'"' {
                pos += 1;
            }
            if pos >= bytes.len() {
                return Err(ParseError::UnexpectedToken {
                    line,
                    col: val_start,
                });
            }
            out.push((key, AttrValue::Quoted(input[val_start..pos].to_string())));
            pos += 1; // closing quote
        } else {
            let val_start = pos;
            while pos < bytes.len() && bytes[pos] != b',' {
                pos += 1;
            }
            let val = input[val_start..pos].trim().to_string();
            out.push((key, AttrValue::Token(val)));
        }
    }

    Ok(out)
}

/// Typed accessors over a parsed attribute list, carrying the owning tag
/// name so errors point at the right place.
pub struct TagAttrs {
    pub tag: &'static str,
    attrs: Vec<(String, AttrValue)>,
}

impl TagAttrs {
    pub fn parse(tag: &'static str, input: &str, line: usize) -> Result<Self, ParseError> {
        Ok(Self {
            tag,
            attrs: split_attributes(input, line)?,
        })
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Attributes not consumed by any typed accessor, e.g. `X-` client
    /// attributes on a DATERANGE.
    pub fn client_attributes(&self) -> Vec<(String, String)> {
        self.attrs
            .iter()
            .filter(|(k, _)| k.starts_with("X-"))
            .map(|(k, v)| (k.clone(), v.as_str().to_string()))
            .collect()
    }

    fn invalid(&self, attr: &str, raw: &str) -> ParseError {
        ParseError::InvalidAttributeValue {
            tag: self.tag,
            attr: attr.to_string(),
            raw: raw.to_string(),
        }
    }

    pub fn required_str(&self, name: &'static str) -> Result<String, ParseError> {
        self.opt_str(name)?
            .ok_or(ParseError::MissingRequiredAttribute {
                tag: self.tag,
                attr: name,
            })
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<String>, ParseError> {
        Ok(self.get(name).map(|v| v.as_str().to_string()))
    }

    pub fn required_u64(&self, name: &'static str) -> Result<u64, ParseError> {
        self.opt_u64(name)?
            .ok_or(ParseError::MissingRequiredAttribute {
                tag: self.tag,
                attr: name,
            })
    }

    pub fn opt_u64(&self, name: &str) -> Result<Option<u64>, ParseError> {
        match self.get(name) {
            Some(v) => v
                .as_str()
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(name, v.as_str())),
            None => Ok(None),
        }
    }

    pub fn required_f64(&self, name: &'static str) -> Result<f64, ParseError> {
        self.opt_f64(name)?
            .ok_or(ParseError::MissingRequiredAttribute {
                tag: self.tag,
                attr: name,
            })
    }

    pub fn opt_f64(&self, name: &str) -> Result<Option<f64>, ParseError> {
        match self.get(name) {
            Some(v) => v
                .as_str()
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(name, v.as_str())),
            None => Ok(None),
        }
    }

    /// `YES`/`NO` enumerated boolean; absent means `NO`.
    pub fn bool(&self, name: &str) -> Result<bool, ParseError> {
        match self.get(name) {
            Some(v) => match v.as_str() {
                "YES" => Ok(true),
                "NO" => Ok(false),
                other => Err(self.invalid(name, other)),
            },
            None => Ok(false),
        }
    }

    pub fn opt_resolution(&self, name: &str) -> Result<Option<Resolution>, ParseError> {
        match self.get(name) {
            Some(v) => Resolution::parse(v.as_str())
                .map(Some)
                .ok_or_else(|| self.invalid(name, v.as_str())),
            None => Ok(None),
        }
    }

    /// A 16-byte `0x`-prefixed hex sequence (the only length HLS uses).
    pub fn opt_iv(&self, name: &str) -> Result<Option<[u8; 16]>, ParseError> {
        let Some(v) = self.get(name) else {
            return Ok(None);
        };
        let raw = v.as_str();
        let digits = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .ok_or_else(|| self.invalid(name, raw))?;
        let bytes = hex::decode(digits).map_err(|_| self.invalid(name, raw))?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| self.invalid(name, raw))?;
        Ok(Some(arr))
    }

    pub fn opt_byte_range(&self, name: &str) -> Result<Option<ByteRange>, ParseError> {
        match self.get(name) {
            Some(v) => ByteRange::parse(v.as_str())
                .map(Some)
                .ok_or_else(|| self.invalid(name, v.as_str())),
            None => Ok(None),
        }
    }
}

/// Builds an attribute list string in insertion order.
#[derive(Default)]
pub struct AttrWriter {
    out: String,
}

impl AttrWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn sep(&mut self) {
        if !self.out.is_empty() {
            self.out.push(',');
        }
    }

    pub fn quoted(&mut self, key: &str, value: &str) -> &mut Self {
        self.sep();
        let _ = write!(self.out, "{}=\"{}\"", key, value);
        self
    }

    pub fn token(&mut self, key: &str, value: &str) -> &mut Self {
        self.sep();
        let _ = write!(self.out, "{}={}", key, value);
        self
    }

    pub fn u64(&mut self, key: &str, value: u64) -> &mut Self {
        self.sep();
        let _ = write!(self.out, "{}={}", key, value);
        self
    }

    pub fn float(&mut self, key: &str, value: f64) -> &mut Self {
        self.sep();
        let _ = write!(self.out, "{}={}", key, format_float(value));
        self
    }

    pub fn resolution(&mut self, key: &str, value: Resolution) -> &mut Self {
        self.sep();
        let _ = write!(self.out, "{}={}", key, value);
        self
    }

    pub fn hex(&mut self, key: &str, value: &[u8]) -> &mut Self {
        self.sep();
        let _ = write!(self.out, "{}=0x{}", key, hex::encode(value));
        self
    }

    /// Emit `KEY=YES`; `NO` attributes are omitted.
    pub fn yes(&mut self, key: &str, value: bool) -> &mut Self {
        if value {
            self.token(key, "YES");
        }
        self
    }

    /// Emit `KEY=YES` or `KEY=NO` explicitly.
    pub fn yes_no(&mut self, key: &str, value: bool) -> &mut Self {
        self.token(key, if value { "YES" } else { "NO" })
    }

    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.out)
    }
}

/// Decimal formatting for durations and other floating attributes: up to
/// three fractional digits, trailing zeros stripped, at least one kept.
pub fn format_float(v: f64) -> String {
    let mut s = format!("{:.3}", v);
    while s.ends_with('0') && !s.ends_with(".0") {
        s.pop();
    }
    s
}

/// EXTINF duration formatting; integer below protocol version 3.
pub fn format_duration(v: f64, version: u8) -> String {
    if version < 3 {
        format!("{}", v.round() as i64)
    } else {
        format_float(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_quoted_values_with_commas() {
        let attrs = split_attributes(r#"BANDWIDTH=800000,CODECS="avc1.4d401e,mp4a.40.2""#, 1)
            .unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].1, AttrValue::Token("800000".into()));
        assert_eq!(attrs[1].1, AttrValue::Quoted("avc1.4d401e,mp4a.40.2".into()));
    }

    #[test]
    fn tolerates_whitespace_around_equals() {
        let attrs = split_attributes("A = 1 , B =\"x\"", 1).unwrap();
        assert_eq!(attrs[0].0, "A");
        assert_eq!(attrs[0].1.as_str(), "1");
        assert_eq!(attrs[1].1, AttrValue::Quoted("x".into()));
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        assert!(split_attributes(r#"URI="oops"#, 3).is_err());
    }

    #[test]
    fn float_formatting() {
        assert_eq!(format_float(6.006), "6.006");
        assert_eq!(format_float(6.0), "6.0");
        assert_eq!(format_float(5.839), "5.839");
        assert_eq!(format_float(0.33), "0.33");
        assert_eq!(format_duration(6.006, 2), "6");
        assert_eq!(format_duration(6.006, 3), "6.006");
    }

    #[test]
    fn iv_parsing() {
        let attrs = TagAttrs::parse(
            "EXT-X-KEY",
            "IV=0x00000000000000000000000000000001",
            1,
        )
        .unwrap();
        let iv = attrs.opt_iv("IV").unwrap().unwrap();
        assert_eq!(iv[15], 1);
    }
}
