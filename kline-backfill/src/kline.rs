//! Kline (OHLCV) records and the normaliser from the upstream positional format.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Column names of a persisted kline row, in output order.
pub const KLINE_HEADER: [&str; 7] = [
    "open_time",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "close_time",
];

/// Binance kline response format.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/rest-api/market-data-endpoints#klinecandlestick-data>
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawKline(
    pub i64,     // 0: Open time
    pub Decimal, // 1: Open
    pub Decimal, // 2: High
    pub Decimal, // 3: Low
    pub Decimal, // 4: Close
    pub Decimal, // 5: Volume
    pub i64,     // 6: Close time
    #[serde(default)] pub Decimal, // 7: Quote asset volume
    #[serde(default)] pub u64,     // 8: Number of trades
    #[serde(default)] pub Decimal, // 9: Taker buy base asset volume
    #[serde(default)] pub Decimal, // 10: Taker buy quote asset volume
    #[serde(default)] pub String,  // 11: Ignore
);

/// One time bucket of trading activity for a (symbol, resolution).
///
/// `open_time` and `close_time` are both inclusive epoch milliseconds; the next bucket
/// conventionally opens at `close_time + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

impl Kline {
    pub fn close_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.close_time)
    }
}

impl From<RawKline> for Kline {
    fn from(raw: RawKline) -> Self {
        let RawKline(open_time, open, high, low, close, volume, close_time, ..) = raw;
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            close_time,
        }
    }
}

/// Map one upstream page into canonical [`Kline`]s, preserving upstream ordering.
pub fn normalize(page: Vec<RawKline>) -> Vec<Kline> {
    page.into_iter().map(Kline::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    mod de {
        use super::*;

        #[test]
        fn test_raw_kline() {
            struct TestCase {
                input: &'static str,
                expected: Result<RawKline, ()>,
            }

            let tests = vec![
                // TC0: full 12 column Binance kline is deserialised
                TestCase {
                    input: r#"
                        [
                            1514764800000,
                            "13715.65000000",
                            "13818.55000000",
                            "12750.00000000",
                            "13380.00000000",
                            "8609.91584400",
                            1514851199999,
                            "114799747.44197057",
                            105595,
                            "3961.93894600",
                            "52809747.44038045",
                            "0"
                        ]
                    "#,
                    expected: Ok(RawKline(
                        1514764800000,
                        dec!(13715.65000000),
                        dec!(13818.55000000),
                        dec!(12750.00000000),
                        dec!(13380.00000000),
                        dec!(8609.91584400),
                        1514851199999,
                        dec!(114799747.44197057),
                        105595,
                        dec!(3961.93894600),
                        dec!(52809747.44038045),
                        "0".to_string(),
                    )),
                },
                // TC1: trailing statistics columns are optional
                TestCase {
                    input: r#"[1514764800000,"1.0","2.0","0.5","1.5","10",1514767199999]"#,
                    expected: Ok(RawKline(
                        1514764800000,
                        dec!(1.0),
                        dec!(2.0),
                        dec!(0.5),
                        dec!(1.5),
                        dec!(10),
                        1514767199999,
                        Decimal::ZERO,
                        0,
                        Decimal::ZERO,
                        Decimal::ZERO,
                        String::new(),
                    )),
                },
                // TC2: missing close time is rejected
                TestCase {
                    input: r#"[1514764800000,"1.0","2.0","0.5","1.5","10"]"#,
                    expected: Err(()),
                },
                // TC3: non numeric price is rejected
                TestCase {
                    input: r#"[1514764800000,"abc","2.0","0.5","1.5","10",1514767199999]"#,
                    expected: Err(()),
                },
            ];

            for (index, test) in tests.into_iter().enumerate() {
                let actual = serde_json::from_str::<RawKline>(test.input);
                match (actual, test.expected) {
                    (Ok(actual), Ok(expected)) => {
                        assert_eq!(actual, expected, "TC{} failed", index)
                    }
                    (Err(_), Err(_)) => {
                        // Test passed
                    }
                    (actual, expected) => {
                        // Test failed
                        panic!(
                            "TC{index} failed because actual != expected. \nActual: {actual:?}\nExpected: {expected:?}\n"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_normalize_preserves_order_and_scale() {
        let page = serde_json::from_str::<Vec<RawKline>>(
            r#"[
                [1514764800000,"13715.65000000","13818.55000000","12750.00000000","13380.00000000","8609.91584400",1514851199999,"0",1,"0","0","0"],
                [1514851200000,"13382.16000000","15473.49000000","12890.02000000","14675.11000000","20078.09211100",1514937599999,"0",1,"0","0","0"]
            ]"#,
        )
        .unwrap();

        let actual = normalize(page);

        assert_eq!(
            actual,
            vec![
                Kline {
                    open_time: 1514764800000,
                    open: dec!(13715.65000000),
                    high: dec!(13818.55000000),
                    low: dec!(12750.00000000),
                    close: dec!(13380.00000000),
                    volume: dec!(8609.91584400),
                    close_time: 1514851199999,
                },
                Kline {
                    open_time: 1514851200000,
                    open: dec!(13382.16000000),
                    high: dec!(15473.49000000),
                    low: dec!(12890.02000000),
                    close: dec!(14675.11000000),
                    volume: dec!(20078.09211100),
                    close_time: 1514937599999,
                },
            ]
        );
        assert_eq!(actual[0].open.to_string(), "13715.65000000");
    }

    #[test]
    fn test_normalize_empty_page() {
        assert!(normalize(Vec::new()).is_empty());
    }
}
