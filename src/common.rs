use crate::errors::{BadIcapMethodError, BadIcapVersionError};
use cds::aformat;
use std::{
    fmt::{self, Display, Formatter},
    sync::atomic::{AtomicUsize, Ordering},
};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Default)]
#[non_exhaustive]
pub enum Method {
    #[default]
    Options,
    ReqMod,
    RespMod,
}

impl Method {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::ReqMod => "REQMOD",
            Self::RespMod => "RESPMOD",
        }
    }

    #[inline]
    pub fn is_options(self) -> bool {
        self == Self::Options
    }

    /// REQMOD or RESPMOD, i.e. a request that carries an `Encapsulated` table.
    #[inline]
    pub fn is_adaptation(self) -> bool {
        self == Self::ReqMod || self == Self::RespMod
    }
}

impl std::str::FromStr for Method {
    type Err = BadIcapMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPTIONS" => Ok(Self::Options),
            "REQMOD" => Ok(Self::ReqMod),
            "RESPMOD" => Ok(Self::RespMod),
            _ => Err(BadIcapMethodError),
        }
    }
}

impl Display for Method {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Default)]
#[non_exhaustive]
pub enum Version {
    #[default]
    Icap10,
}

impl Version {
    #[inline]
    pub fn as_str(self) -> &'static str {
        "ICAP/1.0"
    }
}

impl std::str::FromStr for Version {
    type Err = BadIcapVersionError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ICAP/1.0" => Ok(Self::Icap10),
            _ => Err(BadIcapVersionError),
        }
    }
}

impl Display for Version {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// ----------------------------------------------------------------------------

#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct Id(pub(crate) usize);

impl fmt::Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.pad(aformat!(32, "{:#X}", self.0)?.as_str())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.pad(aformat!(32, "Id({:#X})", self.0)?.as_str())
    }
}

#[derive(Debug)]
pub struct IdGenerator {
    gen: AtomicUsize,
}

impl IdGenerator {
    #[inline]
    pub const fn new() -> Self {
        Self {
            gen: AtomicUsize::new(1),
        }
    }

    #[inline]
    pub fn next(&self) -> Id {
        Id(self.gen.fetch_add(1, Ordering::AcqRel))
    }
}

impl Default for IdGenerator {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) static CONN_ID: IdGenerator = IdGenerator::new();

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_method_round_trip() {
        for m in [Method::Options, Method::ReqMod, Method::RespMod] {
            assert_eq!(Method::from_str(m.as_str()).unwrap(), m);
        }
        assert!(Method::from_str("PATCH").is_err());
        assert!(Method::from_str("options").is_err());
    }

    #[test]
    fn test_version() {
        assert_eq!(Version::from_str("ICAP/1.0").unwrap(), Version::Icap10);
        assert!(Version::from_str("HTTP/1.1").is_err());
        assert_eq!(format!("{}", Version::Icap10), "ICAP/1.0");
    }

    #[test]
    fn test_id_display() {
        let id = Id(0x777);
        assert_eq!(format!("{}", id), "0x777");
        assert_eq!(format!("{:?}", id), "Id(0x777)");
    }

    #[test]
    fn test_id_generator() {
        let g = IdGenerator::new();
        assert_eq!(g.next().0, 1);
        assert_eq!(g.next().0, 2);
    }
}
