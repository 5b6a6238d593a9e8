//! Value Objects for the storefront

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use thiserror::Error;
use uuid::Uuid;

/// Money value object.
///
/// Amounts are fixed-point and always render with exactly two fractional
/// digits, both through `Display` and through serde.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(Decimal);

impl Money {
    pub fn new(amount: Decimal) -> Self { Self(amount) }
    pub fn zero() -> Self { Self(Decimal::ZERO) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn multiply(&self, qty: i32) -> Money { Money(self.0 * Decimal::from(qty)) }

    /// Whole currency units, fractional part dropped. The gateway only accepts integers.
    pub fn whole_units(&self) -> i64 {
        self.0.trunc().to_i64().unwrap_or_default()
    }

    pub fn to_fixed(&self) -> String {
        let mut value = self.0.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        value.rescale(2);
        value.to_string()
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self { Self(amount) }
}

impl Add for Money {
    type Output = Money;
    fn add(self, other: Money) -> Money { Money(self.0 + other.0) }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.to_fixed()) }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_fixed())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        <Decimal as Deserialize>::deserialize(deserializer).map(Money)
    }
}

/// Canonical selection of product variants on a cart item.
///
/// Ids are kept sorted and deduplicated, so two selections compare equal
/// whatever order the variants were attached in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct VariantSet(Vec<Uuid>);

impl VariantSet {
    pub fn new(ids: impl IntoIterator<Item = Uuid>) -> Self {
        let mut ids: Vec<Uuid> = ids.into_iter().collect();
        ids.sort();
        ids.dedup();
        Self(ids)
    }
    pub fn empty() -> Self { Self(Vec::new()) }
    pub fn ids(&self) -> &[Uuid] { &self.0 }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl FromIterator<Uuid> for VariantSet {
    fn from_iter<I: IntoIterator<Item = Uuid>>(iter: I) -> Self { Self::new(iter) }
}

/// Who a cart belongs to: an anonymous session or an authenticated user.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CartOwner {
    Session(String),
    User(Uuid),
}

impl CartOwner {
    /// Key used to serialise cart writes for one owner.
    pub fn lock_key(&self) -> String {
        match self {
            Self::Session(key) => format!("cart:session:{key}"),
            Self::User(id) => format!("cart:user:{id}"),
        }
    }
}

/// Kenyan mobile number in gateway form (`2547XXXXXXXX` / `2541XXXXXXXX`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Msisdn(String);

impl Msisdn {
    pub fn parse(raw: &str) -> Result<Self, PhoneError> {
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let normalized = if let Some(rest) = compact.strip_prefix("+254") {
            format!("254{rest}")
        } else if let Some(rest) = compact.strip_prefix('0') {
            format!("254{rest}")
        } else {
            compact
        };
        if normalized.is_empty() { return Err(PhoneError::Empty); }
        if !normalized.chars().all(|c| c.is_ascii_digit()) { return Err(PhoneError::NotNumeric); }
        let valid_prefix = normalized.starts_with("2547") || normalized.starts_with("2541");
        if normalized.len() != 12 || !valid_prefix { return Err(PhoneError::NotKenyanMobile(normalized)); }
        Ok(Self(normalized))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Msisdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,
    #[error("phone number must contain digits only")]
    NotNumeric,
    #[error("{0} is not a Kenyan mobile number")]
    NotKenyanMobile(String),
}

/// Human-facing order reference: order date plus the order's sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn generate(date: NaiveDate, seq: i64) -> Self {
        Self(format!("{}-{:06}", date.format("%Y%m%d"), seq))
    }
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn into_string(self) -> String { self.0 }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_renders_two_places() {
        assert_eq!(Money::new(dec!(1500)).to_fixed(), "1500.00");
        assert_eq!(Money::new(dec!(19.999)).to_fixed(), "20.00");
        assert_eq!(Money::new(dec!(0.5)).to_string(), "0.50");
        assert_eq!(serde_json::to_string(&Money::new(dec!(12.3))).unwrap(), "\"12.30\"");
    }

    #[test]
    fn test_money_reads_back_from_json() {
        let parsed: Money = serde_json::from_str("\"1351.50\"").unwrap();
        assert_eq!(parsed, Money::new(dec!(1351.50)));
        let parsed: Money = serde_json::from_str(&serde_json::to_string(&Money::new(dec!(7))).unwrap()).unwrap();
        assert_eq!(parsed.to_fixed(), "7.00");
        assert!(serde_json::from_str::<Money>("\"lots\"").is_err());
    }

    #[test]
    fn test_money_arithmetic() {
        let unit = Money::new(dec!(450.50));
        assert_eq!(unit.multiply(3).amount(), dec!(1351.50));
        let total: Money = vec![unit, Money::new(dec!(49.50))].into_iter().sum();
        assert_eq!(total.to_fixed(), "500.00");
        assert_eq!(Money::new(dec!(999.99)).whole_units(), 999);
    }

    #[test]
    fn test_variant_set_ignores_order() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        assert_eq!(VariantSet::new([b, a]), VariantSet::new([a, b]));
        assert_eq!(VariantSet::new([a, a]).ids().len(), 1);
        assert_ne!(VariantSet::new([a]), VariantSet::empty());
    }

    #[test]
    fn test_msisdn_normalisation() {
        assert_eq!(Msisdn::parse("0712345678").unwrap().as_str(), "254712345678");
        assert_eq!(Msisdn::parse("+254712345678").unwrap().as_str(), "254712345678");
        assert_eq!(Msisdn::parse("254112345678").unwrap().as_str(), "254112345678");
        assert_eq!(Msisdn::parse(" 0712 345 678 ").unwrap().as_str(), "254712345678");
        assert_eq!(Msisdn::parse(""), Err(PhoneError::Empty));
        assert_eq!(Msisdn::parse("07123abc78"), Err(PhoneError::NotNumeric));
        assert!(matches!(Msisdn::parse("0712"), Err(PhoneError::NotKenyanMobile(_))));
    }

    #[test]
    fn test_order_number() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        assert_eq!(OrderNumber::generate(date, 42).as_str(), "20261018-000042");
    }

    #[test]
    fn test_cart_owner_lock_keys_differ() {
        let user = CartOwner::User(Uuid::nil());
        let session = CartOwner::Session("abc".into());
        assert_ne!(user.lock_key(), session.lock_key());
    }
}
