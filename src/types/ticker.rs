use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{Error, Result};

const MAX_TICKER_LEN: usize = 36;

/// Exchange-assigned security code, normalised to uppercase.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    pub fn parse(raw: &str) -> Result<Self> {
        let code = raw.trim().to_ascii_uppercase();

        if code.is_empty() || code.len() > MAX_TICKER_LEN {
            return Err(Error::InvalidTicker(raw.to_string()));
        }

        let valid = code.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid || code.starts_with('.') {
            return Err(Error::InvalidTicker(raw.to_string()));
        }

        Ok(Ticker(code))
    }

    /// Parses a comma separated list, dropping repeats but keeping the
    /// first-seen order.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>> {
        let mut tickers = Vec::new();
        for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
            tickers.push(Ticker::parse(part)?);
        }
        Ok(Ticker::dedup(tickers))
    }

    pub fn dedup(tickers: Vec<Ticker>) -> Vec<Ticker> {
        let mut seen = std::collections::HashSet::new();
        tickers.into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Ticker {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Ticker::parse(&value)
    }
}

impl From<Ticker> for String {
    fn from(ticker: Ticker) -> String {
        ticker.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
