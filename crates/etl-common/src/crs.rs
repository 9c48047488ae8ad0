//! Coordinate Reference System codes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{ParseError, ParseResult};

/// CRS codes the pipeline can reproject to and from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrsCode {
    /// WGS84 Geographic (lon/lat in degrees)
    Epsg4326,
    /// ETRS89 Geographic, treated as coincident with WGS84
    Epsg4258,
    /// Web Mercator (meters)
    Epsg3857,
    /// ETRS89 / LAEA Europe (meters)
    Epsg3035,
    /// WGS84 / UTM zone, EPSG 326xx (north) or 327xx (south)
    Utm { zone: u8, north: bool },
}

impl CrsCode {
    /// Parse a CRS reference.
    ///
    /// Accepts formats like:
    /// - "EPSG:3035" / "epsg:3035"
    /// - "urn:ogc:def:crs:EPSG::3035"
    /// - "OGC:CRS84" / "CRS:84" (lon/lat WGS84)
    /// - "32633" (bare EPSG number)
    pub fn parse(s: &str) -> ParseResult<Self> {
        let trimmed = s.trim();
        let upper = trimmed.to_uppercase();

        if matches!(
            upper.as_str(),
            "CRS:84" | "OGC:CRS84" | "URN:OGC:DEF:CRS:OGC:1.3:CRS84" | "URN:OGC:DEF:CRS:OGC::CRS84"
        ) {
            return Ok(CrsCode::Epsg4326);
        }

        let digits = if let Some(rest) = upper.strip_prefix("EPSG:") {
            rest
        } else if let Some(idx) = upper.rfind("EPSG:") {
            // urn:ogc:def:crs:EPSG::3035 or urn:ogc:def:crs:EPSG:9.8.1:3035
            upper[idx + 5..].rsplit(':').next().unwrap_or("")
        } else {
            upper.as_str()
        };

        let code: u32 = digits
            .trim()
            .parse()
            .map_err(|_| ParseError::UnsupportedCrs(trimmed.to_string()))?;

        Self::from_epsg(code).ok_or_else(|| ParseError::UnsupportedCrs(trimmed.to_string()))
    }

    /// Map a numeric EPSG code to a supported CRS.
    pub fn from_epsg(code: u32) -> Option<Self> {
        match code {
            4326 => Some(CrsCode::Epsg4326),
            4258 => Some(CrsCode::Epsg4258),
            3857 | 900913 => Some(CrsCode::Epsg3857),
            3035 => Some(CrsCode::Epsg3035),
            32601..=32660 => Some(CrsCode::Utm {
                zone: (code - 32600) as u8,
                north: true,
            }),
            32701..=32760 => Some(CrsCode::Utm {
                zone: (code - 32700) as u8,
                north: false,
            }),
            _ => None,
        }
    }

    /// Numeric EPSG code.
    pub fn epsg(&self) -> u32 {
        match self {
            CrsCode::Epsg4326 => 4326,
            CrsCode::Epsg4258 => 4258,
            CrsCode::Epsg3857 => 3857,
            CrsCode::Epsg3035 => 3035,
            CrsCode::Utm { zone, north: true } => 32600 + *zone as u32,
            CrsCode::Utm { zone, north: false } => 32700 + *zone as u32,
        }
    }

    /// Check if this is a geographic (lon/lat) CRS.
    pub fn is_geographic(&self) -> bool {
        matches!(self, CrsCode::Epsg4326 | CrsCode::Epsg4258)
    }

    /// Lower-case token used in output file names, e.g. "epsg3035".
    pub fn slug(&self) -> String {
        format!("epsg{}", self.epsg())
    }
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for CrsCode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CrsCode::parse(s)
    }
}

impl Serialize for CrsCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CrsCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CrsCode::parse(&s).map_err(serde::de::Error::custom)
    }
}
