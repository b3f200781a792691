//! Image resolutions offered by the feed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionInfo {
    /// Stable code persisted in storage.
    pub code: &'static str,
    pub name: &'static str,
    /// Appended to a record's `urlbase` to form the image URL.
    pub suffix: &'static str,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResolutionCode {
    Standard,
    FullHd,
    Hd,
    Uhd4k,
}

const RESOLUTIONS: [ResolutionInfo; 4] = [
    ResolutionInfo { code: "Standard", name: "Standard", suffix: "_1366x768.jpg", width: 1366, height: 768 },
    ResolutionInfo { code: "FullHD", name: "Full HD", suffix: "_1920x1080.jpg", width: 1920, height: 1080 },
    ResolutionInfo { code: "HD", name: "HD", suffix: "_1920x1200.jpg", width: 1920, height: 1200 },
    ResolutionInfo { code: "UHD4K", name: "UHD", suffix: "_UHD.jpg", width: 3840, height: 2160 },
];

impl ResolutionCode {
    pub const ALL: [ResolutionCode; 4] = [
        ResolutionCode::Standard,
        ResolutionCode::FullHd,
        ResolutionCode::Hd,
        ResolutionCode::Uhd4k,
    ];

    pub fn info(self) -> &'static ResolutionInfo {
        &RESOLUTIONS[self as usize]
    }

    pub fn code(self) -> &'static str {
        self.info().code
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn suffix(self) -> &'static str {
        self.info().suffix
    }

    /// `WxH`, e.g. `1920x1080`.
    pub fn size(self) -> String {
        format!("{}x{}", self.info().width, self.info().height)
    }
}

impl fmt::Display for ResolutionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ResolutionCode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ResolutionCode::ALL
            .into_iter()
            .find(|r| {
                r.code().eq_ignore_ascii_case(s)
                    || r.name().eq_ignore_ascii_case(s)
                    || r.size().eq_ignore_ascii_case(s)
            })
            .ok_or_else(|| CoreError::UnknownResolution(s.to_string()))
    }
}

impl TryFrom<String> for ResolutionCode {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResolutionCode> for String {
    fn from(r: ResolutionCode) -> Self {
        r.code().to_string()
    }
}
