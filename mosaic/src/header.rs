//! Quadrant header cards
//!
//! Headers are plain key → value maps. Keys are case-insensitive and stored
//! upper-case. Only the handful of cards the correction pipeline needs are
//! given typed accessors; missing cards fall back to documented defaults and
//! are never an error.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Julian date of the Unix epoch (1970-01-01T00:00:00 UTC)
pub const UNIX_EPOCH_JD: f64 = 2_440_587.5;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Value of one header card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl HeaderValue {
    /// Numeric view of the value; numeric text is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HeaderValue::Int(v) => Some(*v as f64),
            HeaderValue::Float(v) => Some(*v),
            HeaderValue::Text(s) => s.trim().parse().ok(),
            HeaderValue::Bool(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(v) => Some(*v),
            HeaderValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            HeaderValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Bool(v) => write!(f, "{}", if *v { "T" } else { "F" }),
            HeaderValue::Int(v) => write!(f, "{v}"),
            HeaderValue::Float(v) => write!(f, "{v}"),
            HeaderValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for HeaderValue {
    fn from(v: bool) -> Self {
        HeaderValue::Bool(v)
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        HeaderValue::Int(v)
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        HeaderValue::Float(v)
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::Text(v.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::Text(v)
    }
}

/// Convert a Julian date to its UTC calendar date.
pub fn julian_date_to_date(jd: f64) -> Option<NaiveDate> {
    if !jd.is_finite() {
        return None;
    }
    let seconds = ((jd - UNIX_EPOCH_JD) * SECONDS_PER_DAY).floor();
    DateTime::from_timestamp(seconds as i64, 0).map(|t| t.date_naive())
}

/// Header of one quadrant readout.
///
/// Keys are stored upper-case, including those read from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, HeaderValue>",
    into = "BTreeMap<String, HeaderValue>"
)]
pub struct Header {
    cards: BTreeMap<String, HeaderValue>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a card, replacing any previous value.
    pub fn insert(&mut self, key: &str, value: impl Into<HeaderValue>) {
        self.cards.insert(key.to_ascii_uppercase(), value.into());
    }

    /// Builder-style [`Header::insert`]
    pub fn with(mut self, key: &str, value: impl Into<HeaderValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.cards.get(&key.to_ascii_uppercase())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(HeaderValue::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(HeaderValue::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(HeaderValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.cards.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// `FILTER`, `"unknown"` when absent
    pub fn filter_name(&self) -> String {
        self.get_str("FILTER").unwrap_or("unknown").to_string()
    }

    /// `EXPTIME` in seconds, NaN when absent
    pub fn exposure_time(&self) -> f64 {
        self.get_f64("EXPTIME").unwrap_or(f64::NAN)
    }

    /// `OBSJD`
    pub fn obs_jd(&self) -> Option<f64> {
        self.get_f64("OBSJD")
    }

    /// Calendar (UTC) date of `OBSJD`
    pub fn obs_date(&self) -> Option<NaiveDate> {
        self.obs_jd().and_then(julian_date_to_date)
    }

    /// `GAIN` in ADU per electron, NaN when absent
    pub fn gain(&self) -> f64 {
        self.get_f64("GAIN").unwrap_or(f64::NAN)
    }

    /// `DARKCUR`
    pub fn dark_current(&self) -> Option<f64> {
        self.get_f64("DARKCUR")
    }

    /// `READNOI`
    pub fn read_noise(&self) -> Option<f64> {
        self.get_f64("READNOI")
    }

    /// Quadrant id from the zero-based `AMP_ID` card
    pub fn qid(&self) -> Option<usize> {
        self.get_i64("AMP_ID")
            .and_then(|amp| amp.checked_add(1))
            .and_then(|qid| usize::try_from(qid).ok())
    }

    /// CCD id from the `CCD_ID` card
    pub fn ccdid(&self) -> Option<usize> {
        self.get_i64("CCD_ID").and_then(|id| usize::try_from(id).ok())
    }
}

impl FromIterator<(String, HeaderValue)> for Header {
    fn from_iter<I: IntoIterator<Item = (String, HeaderValue)>>(iter: I) -> Self {
        let mut header = Header::new();
        for (key, value) in iter {
            header.insert(&key, value);
        }
        header
    }
}

impl From<BTreeMap<String, HeaderValue>> for Header {
    fn from(cards: BTreeMap<String, HeaderValue>) -> Self {
        cards.into_iter().collect()
    }
}

impl From<Header> for BTreeMap<String, HeaderValue> {
    fn from(header: Header) -> Self {
        header.cards
    }
}
