use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::error::{Error, InvalidCandle, Result};
use crate::types::candle::{MetricRow, RawCandle};
use crate::types::ticker::Ticker;

/// Derive the metric fields for one candle.
///
/// Pure and deterministic. A zero open yields `close_to_open_ratio: None`
/// rather than an infinite or NaN ratio, so nothing non-finite ever reaches
/// storage.
pub fn transform(candle: &RawCandle, ticker: &Ticker) -> Result<MetricRow> {
    compute_row(candle, ticker).map_err(Error::InvalidCandle)
}

fn compute_row(candle: &RawCandle, ticker: &Ticker) -> std::result::Result<MetricRow, InvalidCandle> {
    validate(candle)?;

    let close_to_open_ratio = if candle.open == 0.0 {
        None
    } else {
        Some((candle.close - candle.open) / candle.open)
    };

    Ok(MetricRow {
        ticker: ticker.clone(),
        open: candle.open,
        high: candle.high,
        low: candle.low,
        close: candle.close,
        volume: candle.volume,
        value: candle.value,
        period_start: candle.period_start,
        period_end: candle.period_end,
        sma: (candle.open + candle.close) / 2.0,
        range: candle.high - candle.low,
        mid_price: (candle.high + candle.low) / 2.0,
        close_to_open_ratio,
        landed_at: None,
    })
}

fn validate(candle: &RawCandle) -> std::result::Result<(), InvalidCandle> {
    let prices = [
        ("open", candle.open),
        ("high", candle.high),
        ("low", candle.low),
        ("close", candle.close),
    ];

    for (field, value) in prices {
        if !value.is_finite() {
            return Err(InvalidCandle::NonFinite { field });
        }
        if value < 0.0 {
            return Err(InvalidCandle::NegativePrice { field, value });
        }
    }
    if !candle.value.is_finite() {
        return Err(InvalidCandle::NonFinite { field: "value" });
    }
    if candle.value < 0.0 {
        return Err(InvalidCandle::NegativeAmount { field: "value" });
    }
    if candle.high < candle.low {
        return Err(InvalidCandle::HighBelowLow { high: candle.high, low: candle.low });
    }
    if candle.period_end <= candle.period_start {
        return Err(InvalidCandle::EmptyPeriod);
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RowRejection {
    pub period_start: DateTime<Utc>,
    pub reason: InvalidCandle,
}

/// Transformed series of one ticker. Invalid rows are skipped, not fatal.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SeriesOutcome {
    pub rows: Vec<MetricRow>,
    pub rejections: Vec<RowRejection>,
}

pub fn transform_series(ticker: &Ticker, candles: &[RawCandle]) -> SeriesOutcome {
    let mut outcome = SeriesOutcome {
        rows: Vec::with_capacity(candles.len()),
        rejections: Vec::new(),
    };

    for candle in candles {
        match compute_row(candle, ticker) {
            Ok(row) => outcome.rows.push(row),
            Err(reason) => outcome.rejections.push(RowRejection {
                period_start: candle.period_start,
                reason,
            }),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> RawCandle {
        let start = Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap();
        RawCandle {
            open,
            high,
            low,
            close,
            volume: 1_000,
            value: 250_000.0,
            period_start: start,
            period_end: start + chrono::Duration::minutes(59),
        }
    }

    fn sber() -> Ticker {
        Ticker::parse("SBER").unwrap()
    }

    #[test]
    fn derives_metric_fields() {
        let row = transform(&candle(100.0, 110.0, 95.0, 105.0), &sber()).unwrap();

        assert_eq!(row.sma, 102.5);
        assert_eq!(row.range, 15.0);
        assert_eq!(row.mid_price, 102.5);
        assert_eq!(row.close_to_open_ratio, Some(0.05));
        assert_eq!(row.ticker.as_str(), "SBER");
        assert!(row.landed_at.is_none());
    }

    #[test]
    fn zero_open_yields_null_ratio_not_infinity() {
        let row = transform(&candle(0.0, 2.0, 0.0, 1.0), &sber()).unwrap();
        assert_eq!(row.close_to_open_ratio, None);

        let json = serde_json::to_value(&row).unwrap();
        assert!(json["close_to_open_ratio"].is_null());
        assert!(row.sma.is_finite() && row.range.is_finite() && row.mid_price.is_finite());
    }

    #[test]
    fn rejects_inverted_and_negative_candles() {
        let err = transform(&candle(100.0, 90.0, 95.0, 92.0), &sber()).unwrap_err();
        assert!(matches!(err, Error::InvalidCandle(InvalidCandle::HighBelowLow { .. })));

        let err = transform(&candle(-1.0, 2.0, 0.0, 1.0), &sber()).unwrap_err();
        assert!(matches!(err, Error::InvalidCandle(InvalidCandle::NegativePrice { field: "open", .. })));

        let err = transform(&candle(f64::NAN, 2.0, 0.0, 1.0), &sber()).unwrap_err();
        assert!(matches!(err, Error::InvalidCandle(InvalidCandle::NonFinite { field: "open" })));
    }

    #[test]
    fn series_skips_bad_rows_and_counts_them() {
        let mut late = candle(10.0, 12.0, 9.0, 11.0);
        late.period_start = late.period_start + chrono::Duration::hours(1);
        late.period_end = late.period_end + chrono::Duration::hours(1);

        let candles = vec![candle(10.0, 9.0, 12.0, 11.0), late];
        let outcome = transform_series(&sber(), &candles);

        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rejections.len(), 1);
        assert_eq!(outcome.rejections[0].period_start, candles[0].period_start);
    }

    proptest! {
        #[test]
        fn transform_is_idempotent(
            open in 0.0f64..10_000.0,
            low in 0.0f64..10_000.0,
            spread in 0.0f64..1_000.0,
            close in 0.0f64..10_000.0,
        ) {
            let input = candle(open, low + spread, low, close);
            let first = serde_json::to_vec(&transform(&input, &sber()).unwrap()).unwrap();
            let second = serde_json::to_vec(&transform(&input, &sber()).unwrap()).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn valid_candles_never_produce_non_finite_metrics(
            open in 0.0f64..1e9,
            low in 0.0f64..1e9,
            spread in 0.0f64..1e6,
            close in 0.0f64..1e9,
        ) {
            let row = transform(&candle(open, low + spread, low, close), &sber()).unwrap();
            prop_assert!(row.range >= 0.0);
            prop_assert!(row.sma.is_finite() && row.mid_price.is_finite());
            prop_assert!(row.close_to_open_ratio.is_none_or(f64::is_finite));
        }
    }
}
