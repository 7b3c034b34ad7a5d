use serde::{Deserialize, Deserializer};
use std::{fmt::Display, str::FromStr};

/// Binance spot REST & WebSocket kline adapters.
pub mod binance;

/// Deserialize a `String` as the desired type.
pub fn de_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let data = String::deserialize(deserializer)?;
    data.parse::<T>().map_err(serde::de::Error::custom)
}

/// Deserialize a `u64` milliseconds epoch as unix seconds.
pub fn de_epoch_ms_as_secs<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let epoch_ms: u64 = Deserialize::deserialize(deserializer)?;
    i64::try_from(epoch_ms / 1_000).map_err(serde::de::Error::custom)
}
