use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Availability {
    #[display("В наличии")]
    InStock,
    #[display("Под заказ")]
    OnRequest,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::InStock => "IN_STOCK",
            Availability::OnRequest => "ON_REQUEST",
        }
    }

    pub fn from_str(input: &str) -> Self {
        match input.trim().to_uppercase().as_str() {
            "ON_REQUEST" => Availability::OnRequest,
            _ => Availability::InStock,
        }
    }
}

/// Бренд (серия техники): SHACMAN, DAYUN и т.д.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct City {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    pub slug: String,
    pub series_id: Option<i64>,
    pub category_id: Option<i64>,
    pub title: String,
    pub model_code: String,
    pub config: String,
    pub wheel_formula: String,
    pub price: Option<Decimal>,
    pub availability: Availability,
    pub published: bool,
    pub is_active: bool,
}

/// Предложение: конкретный остаток товара в городе по цене/году/НДС.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub id: i64,
    pub product_id: i64,
    pub city_id: i64,
    pub qty: u32,
    pub price: Option<Decimal>,
    pub currency: String,
    pub vat: String,
    pub year: Option<i32>,
    pub source_file: String,
    pub source_row_hash: String,
    pub batch_token: String,
    pub updated_at: OffsetDateTime,
    pub is_active: bool,
}

impl std::fmt::Display for Offer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.price {
            Some(price) => write!(f, "{} шт., {} {}", self.qty, price, self.currency),
            None => write!(f, "{} шт., без цены", self.qty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_round_trip() {
        assert_eq!(Availability::from_str("IN_STOCK"), Availability::InStock);
        assert_eq!(Availability::from_str("on_request"), Availability::OnRequest);
        assert_eq!(Availability::from_str(" in_stock "), Availability::InStock);
        assert_eq!(Availability::InStock.as_str(), "IN_STOCK");
    }
}
