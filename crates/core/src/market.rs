//! Feed markets (country/region + language).
//!
//! Every market's metadata lives in a single static table indexed by the
//! enum discriminant, so lookups never allocate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Static metadata for one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketInfo {
    /// Locale code sent to the feed, e.g. `en-US`.
    pub code: &'static str,
    /// Variant name, used as the directory/country label.
    pub name: &'static str,
    pub country_en: &'static str,
    pub country_zh: &'static str,
    pub flag: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MarketCode {
    China,
    UnitedStates,
    UnitedKingdom,
    Japan,
    Germany,
    France,
    Spain,
    Italy,
    Russia,
    SouthKorea,
    Brazil,
    Australia,
    Canada,
    India,
}

const MARKETS: [MarketInfo; 14] = [
    MarketInfo { code: "zh-CN", name: "China", country_en: "China (Simplified)", country_zh: "中国", flag: "🇨🇳" },
    MarketInfo { code: "en-US", name: "UnitedStates", country_en: "United States", country_zh: "美国", flag: "🇺🇸" },
    MarketInfo { code: "en-GB", name: "UnitedKingdom", country_en: "United Kingdom", country_zh: "英国", flag: "🇬🇧" },
    MarketInfo { code: "ja-JP", name: "Japan", country_en: "Japan", country_zh: "日本", flag: "🇯🇵" },
    MarketInfo { code: "de-DE", name: "Germany", country_en: "Germany", country_zh: "德国", flag: "🇩🇪" },
    MarketInfo { code: "fr-FR", name: "France", country_en: "France", country_zh: "法国", flag: "🇫🇷" },
    MarketInfo { code: "es-ES", name: "Spain", country_en: "Spain", country_zh: "西班牙", flag: "🇪🇸" },
    MarketInfo { code: "it-IT", name: "Italy", country_en: "Italy", country_zh: "意大利", flag: "🇮🇹" },
    MarketInfo { code: "ru-RU", name: "Russia", country_en: "Russia", country_zh: "俄罗斯", flag: "🇷🇺" },
    MarketInfo { code: "ko-KR", name: "SouthKorea", country_en: "South Korea", country_zh: "韩国", flag: "🇰🇷" },
    MarketInfo { code: "pt-BR", name: "Brazil", country_en: "Brazil", country_zh: "巴西", flag: "🇧🇷" },
    MarketInfo { code: "en-AU", name: "Australia", country_en: "Australia", country_zh: "澳大利亚", flag: "🇦🇺" },
    MarketInfo { code: "en-CA", name: "Canada", country_en: "Canada", country_zh: "加拿大", flag: "🇨🇦" },
    MarketInfo { code: "en-IN", name: "India", country_en: "India", country_zh: "印度", flag: "🇮🇳" },
];

impl MarketCode {
    pub const ALL: [MarketCode; 14] = [
        MarketCode::China,
        MarketCode::UnitedStates,
        MarketCode::UnitedKingdom,
        MarketCode::Japan,
        MarketCode::Germany,
        MarketCode::France,
        MarketCode::Spain,
        MarketCode::Italy,
        MarketCode::Russia,
        MarketCode::SouthKorea,
        MarketCode::Brazil,
        MarketCode::Australia,
        MarketCode::Canada,
        MarketCode::India,
    ];

    pub fn info(self) -> &'static MarketInfo {
        &MARKETS[self as usize]
    }

    pub fn code(self) -> &'static str {
        self.info().code
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Region half of the locale code (`US` for `en-US`).
    pub fn region(self) -> &'static str {
        let code = self.code();
        code.split_once('-').map(|(_, r)| r).unwrap_or(code)
    }

    /// Language half of the locale code (`en` for `en-US`).
    pub fn language(self) -> &'static str {
        let code = self.code();
        code.split_once('-').map(|(l, _)| l).unwrap_or(code)
    }
}

impl fmt::Display for MarketCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for MarketCode {
    type Err = CoreError;

    /// Accepts the locale code (`en-US`), the bare region (`US`) or the
    /// variant name (`UnitedStates`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        MarketCode::ALL
            .into_iter()
            .find(|m| {
                m.code().eq_ignore_ascii_case(s)
                    || m.region().eq_ignore_ascii_case(s)
                    || m.name().eq_ignore_ascii_case(s)
            })
            .ok_or_else(|| CoreError::UnknownMarket(s.to_string()))
    }
}

impl TryFrom<String> for MarketCode {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MarketCode> for String {
    fn from(m: MarketCode) -> Self {
        m.code().to_string()
    }
}
