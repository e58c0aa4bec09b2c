use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::KiraError;

/// Unknown allele call placeholder.
pub const UNKNOWN_ALLELE: &str = "?";

/// Characters accepted in a genotype allele call.
pub const ALLELE_ALPHABET: &str = "AGCTDI0-?";

static RISK_ALLELE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i:(rs\d+))(?:-([A-Za-z]+))?").expect("static risk allele pattern")
});

/// Canonical marker identifier, always `rs<digits>` in lowercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct RsId(String);

impl RsId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RsId {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for RsId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        let is_valid = normalized
            .strip_prefix("rs")
            .map(|digits| !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit()))
            .unwrap_or(false);
        if !is_valid {
            return Err(KiraError::InvalidMarkerId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Splits a GWAS `riskAlleleName` such as `rs3764147-G` into the marker and its
/// optional upper-cased allele suffix. Names that do not start with an rsID
/// (e.g. `chr6:12345-A`) yield `None`.
pub fn parse_risk_allele_name(name: &str) -> Option<(RsId, Option<String>)> {
    let caps = RISK_ALLELE_NAME.captures(name.trim())?;
    let id = RsId(caps.get(1)?.as_str().to_lowercase());
    let allele = caps.get(2).map(|m| m.as_str().to_uppercase());
    Some((id, allele))
}

/// Watson-Crick complement of a single standard base.
pub fn complement(allele: &str) -> Option<&'static str> {
    match allele {
        "A" => Some("T"),
        "T" => Some("A"),
        "G" => Some("C"),
        "C" => Some("G"),
        _ => None,
    }
}

/// Reads a JSON number or numeric string; anything else, or a non-finite
/// result, is treated as absent.
pub fn lenient_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

pub(crate) fn deserialize_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(lenient_f64))
}

fn deserialize_lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(lenient_f64)
        .filter(|v| *v >= 0.0 && *v <= f64::from(u32::MAX))
        .map(|v| v as u32))
}

/// Evidence for one marker as it appears in a condition risk profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawProfileVariant")]
pub struct ProfileVariant {
    pub risk_allele: Option<String>,
    pub protective_allele: Option<String>,
    pub odds_ratio: Option<f64>,
    pub beta: Option<f64>,
    pub p_value: Option<f64>,
    pub reported_gene: Option<String>,
    pub mention_count: Option<u32>,
}

/// Profile entries spell the p-value either way, sometimes both; `p_value`
/// wins when both parse.
#[derive(Debug, Deserialize)]
struct RawProfileVariant {
    #[serde(default)]
    risk_allele: Option<String>,
    #[serde(default)]
    protective_allele: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    odds_ratio: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    beta: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    p_value: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pvalue: Option<f64>,
    #[serde(default)]
    reported_gene: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_u32")]
    mention_count: Option<u32>,
}

impl From<RawProfileVariant> for ProfileVariant {
    fn from(raw: RawProfileVariant) -> Self {
        Self {
            risk_allele: raw.risk_allele,
            protective_allele: raw.protective_allele,
            odds_ratio: raw.odds_ratio,
            beta: raw.beta,
            p_value: raw.p_value.or(raw.pvalue),
            reported_gene: raw.reported_gene,
            mention_count: raw.mention_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlleleEffect {
    Risk,
    Protective,
}

impl fmt::Display for AlleleEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlleleEffect::Risk => write!(f, "risk"),
            AlleleEffect::Protective => write!(f, "protective"),
        }
    }
}

impl ProfileVariant {
    /// The allele whose presence is scored, and its polarity. A non-empty
    /// `risk_allele` wins over `protective_allele`.
    pub fn effect_allele(&self) -> Option<(String, AlleleEffect)> {
        let normalize = |value: &Option<String>| {
            value
                .as_deref()
                .map(|allele| allele.trim().to_uppercase())
                .filter(|allele| !allele.is_empty())
        };
        normalize(&self.risk_allele)
            .map(|allele| (allele, AlleleEffect::Risk))
            .or_else(|| normalize(&self.protective_allele).map(|a| (a, AlleleEffect::Protective)))
    }
}
