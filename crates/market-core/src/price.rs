use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type Price = Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(pub i64);

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for InstrumentId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// One stored price, effective from `valid_after` onwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub price: Price,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_after: OffsetDateTime,
}

impl PriceEntry {
    pub fn new(price: Price, valid_after: OffsetDateTime) -> Self {
        Self { price, valid_after }
    }

    pub fn is_current_at(&self, now: OffsetDateTime) -> bool {
        self.valid_after <= now
    }

    pub fn is_preview_at(&self, now: OffsetDateTime) -> bool {
        self.valid_after > now
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    use super::{InstrumentId, PriceEntry};

    #[test]
    fn entry_at_now_is_current_not_preview() {
        let now = datetime!(2024-03-01 12:00:00 UTC);
        let entry = PriceEntry::new(dec!(4.20), now);

        assert!(entry.is_current_at(now));
        assert!(!entry.is_preview_at(now));
    }

    #[test]
    fn future_entry_is_preview() {
        let now = datetime!(2024-03-01 12:00:00 UTC);
        let entry = PriceEntry::new(dec!(4.20), datetime!(2024-03-01 12:00:15 UTC));

        assert!(entry.is_preview_at(now));
        assert!(!entry.is_current_at(now));
    }

    #[test]
    fn entry_serializes_price_as_string_and_rfc3339_timestamp() {
        let entry = PriceEntry::new(dec!(12.50), datetime!(2024-03-01 12:00:00 UTC));

        let json = serde_json::to_string(&entry).unwrap();

        assert_eq!(
            json,
            r#"{"price":"12.50","valid_after":"2024-03-01T12:00:00Z"}"#
        );
    }

    #[test]
    fn instrument_id_displays_raw_value() {
        assert_eq!(InstrumentId(42).to_string(), "42");
    }
}
