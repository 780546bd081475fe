//! Агрегация распарсенных строк по ключу предложения.

use indexmap::IndexMap;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::parse::ParsedStockRow;

/// Identity of one offer row in the store. Rows with equal keys are the
/// same offer and their quantities add up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OfferKey {
    pub brand_slug: String,
    pub category_slug: String,
    pub model_code: String,
    pub config: String,
    pub city_slug: String,
    pub price: Option<Decimal>,
    pub year: Option<i32>,
    pub vat: String,
}

impl OfferKey {
    pub fn of(row: &ParsedStockRow) -> Self {
        OfferKey {
            brand_slug: row.brand_slug.clone(),
            category_slug: row.category_slug.clone(),
            model_code: row.model_code.clone(),
            config: row.config.clone(),
            city_slug: row.city_slug.clone(),
            price: row.price,
            year: row.year,
            vat: row.vat.clone(),
        }
    }

    pub fn product_key(&self) -> ProductKey {
        ProductKey {
            brand_slug: self.brand_slug.clone(),
            category_slug: self.category_slug.clone(),
            model_code: self.model_code.clone(),
            config: self.config.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProductKey {
    pub brand_slug: String,
    pub category_slug: String,
    pub model_code: String,
    pub config: String,
}

/// First-seen row of the key plus the summed quantity.
#[derive(Debug, Clone)]
pub struct AggregatedOffer {
    pub row: ParsedStockRow,
    pub qty: u32,
}

/// Per-product rollup used to keep the product card in sync with offers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductStats {
    pub total_qty: u32,
    pub min_price: Option<Decimal>,
}

pub fn aggregate(
    rows: Vec<ParsedStockRow>,
) -> (IndexMap<OfferKey, AggregatedOffer>, HashMap<ProductKey, ProductStats>) {
    let mut offers: IndexMap<OfferKey, AggregatedOffer> = IndexMap::new();
    for row in rows {
        let key = OfferKey::of(&row);
        let qty = row.qty;
        offers
            .entry(key)
            .or_insert_with(|| AggregatedOffer { row, qty: 0 })
            .qty += qty;
    }

    let mut products: HashMap<ProductKey, ProductStats> = HashMap::new();
    for (key, offer) in &offers {
        let stats = products.entry(key.product_key()).or_default();
        stats.total_qty += offer.qty;
        if let Some(price) = key.price {
            stats.min_price = Some(match stats.min_price {
                Some(current) => current.min(price),
                None => price,
            });
        }
    }

    (offers, products)
}
