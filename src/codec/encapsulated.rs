use crate::{
    codec::{skip_char, skip_whitespace},
    errors::InvalidEncapsulationError,
    Method,
};
use std::fmt::{self, Display, Formatter};
use tracing::trace;

/// One entry of the `Encapsulated` offset table. Offsets are relative to the
/// first byte after the ICAP header block.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[non_exhaustive]
pub enum EncapsulatedEntity {
    ReqHdr(usize),
    ResHdr(usize),
    ReqBody(usize),
    ResBody(usize),
    NullBody(usize),
}

impl EncapsulatedEntity {
    fn try_from_parts(name: &[u8], offset: &[u8]) -> Result<Self, InvalidEncapsulationError> {
        // offset slice is ASCII digits only, per the scanner
        let offset_str = std::str::from_utf8(offset)
            .map_err(|_| InvalidEncapsulationError("bad offset"))?;
        let off: usize = offset_str
            .parse()
            .map_err(|_| InvalidEncapsulationError("bad offset"))?;

        match name {
            b"req-hdr" => Ok(Self::ReqHdr(off)),
            b"res-hdr" => Ok(Self::ResHdr(off)),
            b"req-body" => Ok(Self::ReqBody(off)),
            b"res-body" => Ok(Self::ResBody(off)),
            b"null-body" => Ok(Self::NullBody(off)),
            _ => {
                trace!(name = ?name, "unknown section token");
                Err(InvalidEncapsulationError("unknown section token"))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ReqHdr(_) => "req-hdr",
            Self::ResHdr(_) => "res-hdr",
            Self::ReqBody(_) => "req-body",
            Self::ResBody(_) => "res-body",
            Self::NullBody(_) => "null-body",
        }
    }

    pub fn offset(&self) -> usize {
        match *self {
            Self::ReqHdr(o)
            | Self::ResHdr(o)
            | Self::ReqBody(o)
            | Self::ResBody(o)
            | Self::NullBody(o) => o,
        }
    }

    #[inline]
    pub fn is_body(&self) -> bool {
        matches!(
            self,
            Self::ReqBody(_) | Self::ResBody(_) | Self::NullBody(_)
        )
    }

    #[inline]
    pub fn is_null_body(&self) -> bool {
        matches!(self, Self::NullBody(_))
    }

    #[inline]
    pub fn is_hdr(&self) -> bool {
        matches!(self, Self::ReqHdr(_) | Self::ResHdr(_))
    }
}

impl Display for EncapsulatedEntity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name(), self.offset())
    }
}

/// A parsed `Encapsulated` header: section kinds with non-decreasing offsets,
/// ending in a body kind. [`Display`] writes it back in table order.
#[derive(Debug, Clone, Default)]
#[repr(transparent)]
pub struct EeList(Vec<EncapsulatedEntity>);

impl EeList {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &EncapsulatedEntity> {
        self.0.iter()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.0.clear()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn last(&self) -> Option<&EncapsulatedEntity> {
        self.0.last()
    }

    /// Offset of the final body section, i.e. the total byte length of the
    /// embedded header sections preceding it.
    #[inline]
    pub fn body_offset(&self) -> Option<usize> {
        match self.0.last() {
            Some(e) if e.is_body() => Some(e.offset()),
            _ => None,
        }
    }

    /// True when the table ends in `req-body` or `res-body` (chunked bytes
    /// follow the embedded headers on the wire).
    #[inline]
    pub fn has_body(&self) -> bool {
        matches!(self.0.last(), Some(e) if e.is_body() && !e.is_null_body())
    }

    pub(crate) fn push(&mut self, e: EncapsulatedEntity) {
        self.0.push(e);
    }

    /// Parses a header value, appending to this table.
    pub fn parse_append(&mut self, buf: &[u8]) -> Result<(), InvalidEncapsulationError> {
        let mut i = 0;
        let mut delimiter = false;
        while i < buf.len() {
            let (off, ee) = parse_entity(&buf[i..], delimiter)?;
            if let Some(e) = ee {
                self.0.push(e);
            }
            i += off;
            delimiter = true;
        }

        if self.0.is_empty() {
            return Err(InvalidEncapsulationError("empty table"));
        }

        for w in self.0.windows(2) {
            if w[1].offset() < w[0].offset() {
                return Err(InvalidEncapsulationError("offsets not non-decreasing"));
            }
        }

        for (i, a) in self.0.iter().enumerate() {
            if self.0[i + 1..].iter().any(|b| b.name() == a.name()) {
                return Err(InvalidEncapsulationError("duplicate section"));
            }
        }

        match self.0.last() {
            Some(e) if e.is_body() => Ok(()),
            _ => Err(InvalidEncapsulationError("last section is not a body")),
        }
    }

    /// Checks the per-method composition rules:
    /// - OPTIONS: no table, or exactly `null-body=0`;
    /// - REQMOD: optional `req-hdr`, then exactly one of `req-body`/`null-body`;
    /// - RESPMOD: optional `req-hdr`, mandatory `res-hdr`, then exactly one of
    ///   `res-body`/`null-body`.
    pub fn validate_for(&self, method: Method) -> Result<(), InvalidEncapsulationError> {
        use EncapsulatedEntity::*;

        if let Some(first) = self.0.first() {
            if first.offset() != 0 {
                return Err(InvalidEncapsulationError("first section not at offset 0"));
            }
        }

        let good = match method {
            Method::Options => match self.0.as_slice() {
                [] => true,
                [NullBody(0)] => true,
                _ => false,
            },
            Method::ReqMod => match self.0.as_slice() {
                [ReqBody(_) | NullBody(_)] => true,
                [ReqHdr(_), ReqBody(_) | NullBody(_)] => true,
                _ => false,
            },
            Method::RespMod => match self.0.as_slice() {
                [ResHdr(_), ResBody(_) | NullBody(_)] => true,
                [ReqHdr(_), ResHdr(_), ResBody(_) | NullBody(_)] => true,
                _ => false,
            },
        };

        if good {
            Ok(())
        } else {
            Err(InvalidEncapsulationError("sections do not fit the method"))
        }
    }
}

impl Display for EeList {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

#[inline]
fn skip_name(buf: &[u8], i: &mut usize) {
    while *i < buf.len() {
        if !matches!(buf[*i], b'a'..=b'z' | b'-') {
            break;
        }
        *i += 1;
    }
}

#[inline]
fn skip_offset(buf: &[u8], i: &mut usize) {
    while *i < buf.len() {
        if !buf[*i].is_ascii_digit() {
            break;
        }
        *i += 1;
    }
}

fn parse_entity(
    buf: &[u8],
    delimiter: bool,
) -> Result<(usize, Option<EncapsulatedEntity>), InvalidEncapsulationError> {
    let mut i = 0;

    skip_whitespace(buf, &mut i);
    if i == buf.len() {
        return Ok((i, None));
    }

    if delimiter {
        let delimiter_start = i;
        skip_char(buf, &mut i, b',');
        if i == delimiter_start {
            return Err(InvalidEncapsulationError("missing delimiter"));
        }
    }

    skip_whitespace(buf, &mut i);

    let name_start = i;
    skip_name(buf, &mut i);
    if i == name_start {
        return Err(InvalidEncapsulationError("empty name"));
    }
    let name = &buf[name_start..i];

    skip_whitespace(buf, &mut i);

    let equals_start = i;
    skip_char(buf, &mut i, b'=');
    if i == equals_start {
        return Err(InvalidEncapsulationError("missing equals"));
    }

    skip_whitespace(buf, &mut i);

    let offset_start = i;
    skip_offset(buf, &mut i);
    if i == offset_start {
        return Err(InvalidEncapsulationError("missing offset"));
    }
    let offset = &buf[offset_start..i];

    Ok((i, Some(EncapsulatedEntity::try_from_parts(name, offset)?)))
}

#[cfg(test)]
mod tests {
    use super::EncapsulatedEntity::*;
    use super::*;

    fn parse(buf: &[u8]) -> Result<EeList, InvalidEncapsulationError> {
        let mut list = EeList::new();
        list.parse_append(buf)?;
        Ok(list)
    }

    #[test]
    fn test_parse_tables() {
        let good: Vec<(&[u8], Vec<EncapsulatedEntity>)> = vec![
            (b"null-body=0".as_ref(), vec![NullBody(0)]),
            (b"req-body=0".as_ref(), vec![ReqBody(0)]),
            (
                b"  req-hdr=0, req-body=112".as_ref(),
                vec![ReqHdr(0), ReqBody(112)],
            ),
            (
                b"res-hdr=0,  res-body=1124".as_ref(),
                vec![ResHdr(0), ResBody(1124)],
            ),
            (
                b"req-hdr=0, res-hdr = 112,  null-body=537  ",
                vec![ReqHdr(0), ResHdr(112), NullBody(537)],
            ),
            (
                b"req-hdr=0,res-hdr=100,res-body=1000",
                vec![ReqHdr(0), ResHdr(100), ResBody(1000)],
            ),
        ];

        for (buf, expected) in &good {
            let el = parse(buf).unwrap();
            assert_eq!(el.iter().copied().collect::<Vec<_>>(), *expected);
        }
    }

    #[test]
    fn test_parse_errors() {
        let bad: Vec<(&[u8], &'static str)> = vec![
            (b"", "empty table"),
            (b"    ", "empty table"),
            (b", req-hdr=12", "empty name"),
            (b"req-hdr=0,,null-body=128", "empty name"),
            (b"=0", "empty name"),
            (b"req-hdr0", "missing equals"),
            (b"null-body=", "missing offset"),
            (b"req-hdr=99999999999999999999999999999", "bad offset"),
            (b"reg-hdr=12", "unknown section token"),
            (b"opt-body=0", "unknown section token"),
            (
                b"req-hdr=0, res-hdr=1023, res-body=517",
                "offsets not non-decreasing",
            ),
            (
                b"req-hdr=0, null-body=5, res-hdr=3",
                "offsets not non-decreasing",
            ),
            (b"req-hdr=0, req-hdr=3, null-body=5", "duplicate section"),
            (b"res-hdr=0", "last section is not a body"),
            (b"req-hdr=0, res-hdr=10", "last section is not a body"),
        ];

        for (buf, reason) in &bad {
            assert_eq!(
                parse(buf).unwrap_err(),
                InvalidEncapsulationError(reason),
                "input: {:?}",
                std::str::from_utf8(buf).unwrap()
            );
        }
    }

    #[test]
    fn test_validate_for_method() {
        let ok: Vec<(&[u8], Method)> = vec![
            (b"null-body=0", Method::Options),
            (b"req-hdr=0, req-body=112", Method::ReqMod),
            (b"req-hdr=0, null-body=112", Method::ReqMod),
            (b"null-body=0", Method::ReqMod),
            (b"res-hdr=0, res-body=45", Method::RespMod),
            (b"req-hdr=0, res-hdr=50, res-body=90", Method::RespMod),
            (b"req-hdr=0, res-hdr=50, null-body=90", Method::RespMod),
        ];
        for (buf, method) in &ok {
            parse(buf).unwrap().validate_for(*method).unwrap();
        }

        let bad: Vec<(&[u8], Method)> = vec![
            (b"req-hdr=0, req-body=5", Method::Options),
            (b"null-body=7", Method::Options),
            (b"res-hdr=0, res-body=45", Method::ReqMod),
            (b"req-hdr=0, res-hdr=10, res-body=20", Method::ReqMod),
            (b"req-hdr=0, req-body=112", Method::RespMod),
            (b"res-body=0", Method::RespMod),
            (b"req-hdr=5, req-body=112", Method::ReqMod),
        ];
        for (buf, method) in &bad {
            assert!(
                parse(buf).unwrap().validate_for(*method).is_err(),
                "input: {:?} {:?}",
                std::str::from_utf8(buf).unwrap(),
                method
            );
        }

        // no table at all is fine for OPTIONS only
        EeList::new().validate_for(Method::Options).unwrap();
    }

    #[test]
    fn test_display_round_trip() {
        let list = parse(b"req-hdr=0 , res-hdr = 112,res-body=132").unwrap();
        assert_eq!(list.to_string(), "req-hdr=0, res-hdr=112, res-body=132");
        let reparsed = parse(list.to_string().as_bytes()).unwrap();
        assert_eq!(reparsed.to_string(), list.to_string());
    }

    #[test]
    fn test_body_accessors() {
        let list = parse(b"res-hdr=0, res-body=45").unwrap();
        assert_eq!(list.body_offset(), Some(45));
        assert!(list.has_body());

        let list = parse(b"req-hdr=0, null-body=80").unwrap();
        assert_eq!(list.body_offset(), Some(80));
        assert!(!list.has_body());

        assert_eq!(EeList::new().body_offset(), None);
    }
}
