use crate::{
    candle::Candle,
    error::{ChartError, FetchError},
    exchange::{de_epoch_ms_as_secs, de_str},
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Messages received on a Binance kline stream.
#[derive(Clone, Debug, PartialEq)]
pub enum BinanceKlineMessage {
    /// Subscription responses & any other payload without a kline.
    Ignore,
    Kline(BinanceKlineEvent),
}

impl<'de> Deserialize<'de> for BinanceKlineMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if value.get("k").is_none() {
            return Ok(BinanceKlineMessage::Ignore);
        }

        BinanceKlineEvent::deserialize(value)
            .map(BinanceKlineMessage::Kline)
            .map_err(serde::de::Error::custom)
    }
}

/// ### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams#klinecandlestick-streams-for-utc>
/// ```json
/// {
///     "e": "kline",
///     "E": 1672515782136,
///     "s": "BTCUSDT",
///     "k": {
///         "t": 1672515780000,
///         "T": 1672515839999,
///         "s": "BTCUSDT",
///         "i": "1m",
///         "o": "16550.10",
///         "c": "16552.00",
///         "h": "16553.40",
///         "l": "16549.80",
///         "v": "12.503",
///         "n": 100,
///         "x": false
///     }
/// }
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct BinanceKlineEvent {
    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "k")]
    pub kline: BinanceKline,
}

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct BinanceKline {
    #[serde(rename = "t", deserialize_with = "de_epoch_ms_as_secs")]
    pub open_time: i64,

    #[serde(rename = "i")]
    pub interval: String,

    #[serde(rename = "o", deserialize_with = "de_str")]
    pub open: f64,

    #[serde(rename = "h", deserialize_with = "de_str")]
    pub high: f64,

    #[serde(rename = "l", deserialize_with = "de_str")]
    pub low: f64,

    #[serde(rename = "c", deserialize_with = "de_str")]
    pub close: f64,

    #[serde(rename = "v", deserialize_with = "de_str")]
    pub volume: f64,

    /// Whether the kline is closed.
    #[serde(rename = "x")]
    pub closed: bool,
}

impl From<&BinanceKline> for Candle {
    fn from(kline: &BinanceKline) -> Self {
        Candle::new(
            kline.open_time,
            kline.open,
            kline.high,
            kline.low,
            kline.close,
            kline.volume,
        )
    }
}

/// Parse a raw kline stream message into a [`Candle`].
pub fn normalise_kline_message(message: &str) -> Result<Option<Candle>, ChartError> {
    match serde_json::from_str::<BinanceKlineMessage>(message) {
        Ok(BinanceKlineMessage::Kline(event)) => Ok(Some(Candle::from(&event.kline))),
        Ok(BinanceKlineMessage::Ignore) => Ok(None),
        Err(error) => Err(ChartError::InvalidInput(format!(
            "malformed Binance kline message: {error}"
        ))),
    }
}

/// Binance REST kline:
/// `[open_time, open, high, low, close, volume, close_time, quote_volume, trades,
/// taker_buy_base, taker_buy_quote, ignore]`
pub type BinanceRestKline = (
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    i64,
    String,
    String,
    String,
);

/// Convert REST klines (milliseconds, string prices) into candles.
pub fn candles_from_rest_klines(klines: Vec<BinanceRestKline>) -> Result<Vec<Candle>, FetchError> {
    klines
        .into_iter()
        .map(|kline| {
            let parse = |field: &str, name: &str| {
                field.parse::<f64>().map_err(|error| {
                    FetchError::Decode(format!("kline {} {name} '{field}': {error}", kline.0))
                })
            };

            Ok(Candle::new(
                kline.0.div_euclid(1_000),
                parse(&kline.1, "open")?,
                parse(&kline.2, "high")?,
                parse(&kline.3, "low")?,
                parse(&kline.4, "close")?,
                parse(&kline.5, "volume")?,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_kline_message() {
        struct TestCase {
            input: &'static str,
            expected: Result<Option<Candle>, ()>,
        }

        let tests = vec![
            TestCase {
                // TC0: open kline
                input: r#"{"e":"kline","E":1672515782136,"s":"BTCUSDT","k":{"t":1672515780000,"T":1672515839999,"s":"BTCUSDT","i":"1m","f":100,"L":200,"o":"16550.10","c":"16552.00","h":"16553.40","l":"16549.80","v":"12.503","n":100,"x":false,"q":"1.0","V":"500","Q":"0.5","B":"0"}}"#,
                expected: Ok(Some(Candle::new(
                    1_672_515_780,
                    16550.10,
                    16553.40,
                    16549.80,
                    16552.00,
                    12.503,
                ))),
            },
            TestCase {
                // TC1: subscription response
                input: r#"{"result":null,"id":1}"#,
                expected: Ok(None),
            },
            TestCase {
                // TC2: kline w/ non-numeric price
                input: r#"{"e":"kline","s":"BTCUSDT","k":{"t":1672515780000,"i":"1m","o":"abc","c":"1","h":"1","l":"1","v":"1","x":true}}"#,
                expected: Err(()),
            },
            TestCase {
                // TC3: not json
                input: "pong",
                expected: Err(()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = normalise_kline_message(test.input).map_err(|_| ());
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_candles_from_rest_klines() {
        let klines: Vec<BinanceRestKline> = serde_json::from_str(
            r#"[[1499040000000,"0.01634790","0.80000000","0.01575800","0.01577100","148976.11427815",1499644799999,"2434.19055334",308,"1756.87402397","28.46694368","0"]]"#,
        )
        .unwrap();

        let candles = candles_from_rest_klines(klines).unwrap();
        assert_eq!(
            candles,
            vec![Candle::new(
                1_499_040_000,
                0.01634790,
                0.80000000,
                0.01575800,
                0.01577100,
                148976.11427815
            )]
        );
    }

    #[test]
    fn test_candles_from_rest_klines_rejects_bad_number() {
        let kline: BinanceRestKline = (
            60_000,
            "1".to_string(),
            "x".to_string(),
            "1".to_string(),
            "1".to_string(),
            "1".to_string(),
            119_999,
            "0".to_string(),
            0,
            "0".to_string(),
            "0".to_string(),
            "0".to_string(),
        );
        assert!(matches!(
            candles_from_rest_klines(vec![kline]),
            Err(FetchError::Decode(_))
        ));
    }
}
