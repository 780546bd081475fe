//! Схема каталога и движок апсерта предложений.
//!
//! Один и тот же код обслуживает обычный прогон и dry-run: поиск в базе
//! выполняется всегда, запись пропускается в режиме [`Mode::DryRun`], а
//! счётчики считаются по фактической разнице полей в обоих режимах.

use std::collections::{HashMap, HashSet};

use lazy_regex::regex;
use once_cell::sync::Lazy;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use time::OffsetDateTime;

use catalog_types::{Availability, Category, City, Offer, Product, Series};

use crate::aggregate::{AggregatedOffer, OfferKey, ProductKey, ProductStats};
use crate::normalize::{city_slug, extract_wheel_formula, short_digest, slugify};
use crate::report::StockImportReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Apply,
    DryRun,
}

impl Mode {
    fn writes(self) -> bool {
        matches!(self, Mode::Apply)
    }
}

static SERIES_NAMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([("shacman", "SHACMAN"), ("dayun", "DAYUN"), ("other", "Other")])
});

static CATEGORY_NAMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("samosvaly", "Самосвалы"),
        ("tyagachi", "Тягачи"),
        ("abs", "Автобетоносмесители"),
        ("kmu", "КМУ"),
        ("zernovozy", "Зерновозы"),
        ("traktory", "Тракторы"),
        ("furgony", "Фургоны"),
        ("tehnika", "Техника"),
    ])
});

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS series (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            slug TEXT NOT NULL COLLATE NOCASE UNIQUE
        );
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            slug TEXT NOT NULL COLLATE NOCASE UNIQUE
        );
        CREATE TABLE IF NOT EXISTS cities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            slug TEXT NOT NULL COLLATE NOCASE UNIQUE,
            is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sku TEXT NOT NULL COLLATE NOCASE UNIQUE,
            slug TEXT NOT NULL COLLATE NOCASE UNIQUE,
            series_id INTEGER REFERENCES series (id),
            category_id INTEGER REFERENCES categories (id),
            title TEXT NOT NULL,
            model_code TEXT NOT NULL,
            config TEXT NOT NULL DEFAULT '',
            wheel_formula TEXT NOT NULL DEFAULT '',
            price TEXT,
            availability TEXT NOT NULL DEFAULT 'IN_STOCK',
            published INTEGER NOT NULL DEFAULT 1,
            is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS offers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id INTEGER NOT NULL REFERENCES products (id),
            city_id INTEGER NOT NULL REFERENCES cities (id),
            qty INTEGER NOT NULL DEFAULT 0,
            price TEXT,
            currency TEXT NOT NULL DEFAULT 'RUB',
            vat TEXT NOT NULL DEFAULT 'с НДС',
            year INTEGER,
            source_file TEXT NOT NULL DEFAULT '',
            source_row_hash TEXT NOT NULL DEFAULT '',
            batch_token TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE UNIQUE INDEX IF NOT EXISTS offer_identity_priced_idx
            ON offers (product_id, city_id, price, year, vat) WHERE price IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS offer_identity_unpriced_idx
            ON offers (product_id, city_id, year, vat) WHERE price IS NULL;
        CREATE INDEX IF NOT EXISTS offer_source_active_idx
            ON offers (source_file, is_active);",
    )?;
    Ok(())
}

/// Справочная сущность, уже существующая или создаваемая этим прогоном.
/// В dry-run у виртуально созданных записей нет id.
#[derive(Debug, Clone)]
pub struct EntityRef {
    pub id: Option<i64>,
    pub slug: String,
}

#[derive(Debug, Clone)]
struct ProductState {
    id: Option<i64>,
    slug: String,
    series_slug: Option<String>,
    category_slug: Option<String>,
    title: String,
    model_code: String,
    config: String,
    wheel_formula: String,
    price: Option<Decimal>,
    availability: Availability,
    is_active: bool,
}

#[derive(Default)]
struct Caches {
    series_by_slug: HashMap<String, EntityRef>,
    category_by_slug: HashMap<String, EntityRef>,
    city_by_slug: HashMap<String, EntityRef>,
    product_by_sku: HashMap<String, ProductState>,
}

pub struct Upserter<'c> {
    conn: &'c Connection,
    mode: Mode,
    caches: Caches,
    touched_offers: HashSet<i64>,
    now: OffsetDateTime,
}

impl<'c> Upserter<'c> {
    pub fn new(conn: &'c Connection, mode: Mode) -> Self {
        Upserter {
            conn,
            mode,
            caches: Caches::default(),
            touched_offers: HashSet::new(),
            now: OffsetDateTime::now_utc(),
        }
    }

    pub fn ensure_series(
        &mut self,
        slug: &str,
        report: &mut StockImportReport,
    ) -> anyhow::Result<EntityRef> {
        let slug = normalize_slug(slug, "other");
        if let Some(entry) = self.caches.series_by_slug.get(&slug) {
            return Ok(entry.clone());
        }

        let id: Option<i64> = self
            .conn
            .query_row("SELECT id FROM series WHERE slug = ?1", params![slug], |r| r.get(0))
            .optional()?;

        let entry = match id {
            Some(id) => EntityRef { id: Some(id), slug: slug.clone() },
            None => {
                report.created_series += 1;
                let name = SERIES_NAMES
                    .get(slug.as_str())
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| slug.to_uppercase());
                let id = if self.mode.writes() {
                    self.conn.execute(
                        "INSERT INTO series (name, slug) VALUES (?1, ?2)",
                        params![name, slug],
                    )?;
                    Some(self.conn.last_insert_rowid())
                } else {
                    None
                };
                EntityRef { id, slug: slug.clone() }
            }
        };
        self.caches.series_by_slug.insert(slug, entry.clone());
        Ok(entry)
    }

    pub fn ensure_category(
        &mut self,
        slug: &str,
        report: &mut StockImportReport,
    ) -> anyhow::Result<EntityRef> {
        let slug = normalize_slug(slug, "tehnika");
        if let Some(entry) = self.caches.category_by_slug.get(&slug) {
            return Ok(entry.clone());
        }

        let id: Option<i64> = self
            .conn
            .query_row("SELECT id FROM categories WHERE slug = ?1", params![slug], |r| r.get(0))
            .optional()?;

        let entry = match id {
            Some(id) => EntityRef { id: Some(id), slug: slug.clone() },
            None => {
                report.created_categories += 1;
                let name = CATEGORY_NAMES
                    .get(slug.as_str())
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| slug.clone());
                let id = if self.mode.writes() {
                    self.conn.execute(
                        "INSERT INTO categories (name, slug) VALUES (?1, ?2)",
                        params![name, slug],
                    )?;
                    Some(self.conn.last_insert_rowid())
                } else {
                    None
                };
                EntityRef { id, slug: slug.clone() }
            }
        };
        self.caches.category_by_slug.insert(slug, entry.clone());
        Ok(entry)
    }

    pub fn ensure_city(
        &mut self,
        name: &str,
        slug: &str,
        report: &mut StockImportReport,
    ) -> anyhow::Result<EntityRef> {
        let slug = {
            let trimmed = slug.trim().to_lowercase();
            if trimmed.is_empty() {
                city_slug(name)
            } else {
                trimmed
            }
        };
        if let Some(entry) = self.caches.city_by_slug.get(&slug) {
            return Ok(entry.clone());
        }

        let existing: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT id, name FROM cities WHERE slug = ?1",
                params![slug],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let entry = match existing {
            Some((id, stored_name)) => {
                let incoming = name.trim();
                if self.mode.writes() && !incoming.is_empty() && stored_name != incoming {
                    self.conn.execute(
                        "UPDATE cities SET name = ?1 WHERE id = ?2",
                        params![incoming, id],
                    )?;
                }
                EntityRef { id: Some(id), slug: slug.clone() }
            }
            None => {
                report.created_cities += 1;
                let display = if name.trim().is_empty() { slug.as_str() } else { name.trim() };
                let id = if self.mode.writes() {
                    self.conn.execute(
                        "INSERT INTO cities (name, slug) VALUES (?1, ?2)",
                        params![display, slug],
                    )?;
                    Some(self.conn.last_insert_rowid())
                } else {
                    None
                };
                EntityRef { id, slug: slug.clone() }
            }
        };
        self.caches.city_by_slug.insert(slug, entry.clone());
        Ok(entry)
    }

    pub fn upsert_product(
        &mut self,
        series: &EntityRef,
        category: &EntityRef,
        key: &ProductKey,
        title: &str,
        stats: &ProductStats,
        report: &mut StockImportReport,
    ) -> anyhow::Result<ProductHandle> {
        let (sku, computed_slug) = product_identity(key);
        let sku_ci = sku.to_lowercase();

        let mut state = match self.caches.product_by_sku.get(&sku_ci) {
            Some(state) => Some(state.clone()),
            None => self.load_product(&sku)?,
        };

        let availability = if stats.total_qty > 0 {
            Availability::InStock
        } else {
            Availability::OnRequest
        };
        let wheel_formula =
            extract_wheel_formula(&[&key.config, &key.model_code]).unwrap_or_default();
        let title = title.trim();

        let state = match state.take() {
            None => {
                report.created_products += 1;
                let title = if title.is_empty() { sku.clone() } else { title.to_string() };
                let id = if self.mode.writes() {
                    self.conn.execute(
                        "INSERT INTO products (sku, slug, series_id, category_id, title,
                             model_code, config, wheel_formula, price, availability,
                             published, is_active)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, 1)",
                        params![
                            sku,
                            computed_slug,
                            series.id,
                            category.id,
                            title,
                            key.model_code,
                            key.config,
                            wheel_formula,
                            stats.min_price.map(|p| p.to_string()),
                            availability.as_str(),
                        ],
                    )?;
                    Some(self.conn.last_insert_rowid())
                } else {
                    None
                };
                ProductState {
                    id,
                    slug: computed_slug,
                    series_slug: Some(series.slug.clone()),
                    category_slug: Some(category.slug.clone()),
                    title,
                    model_code: key.model_code.clone(),
                    config: key.config.clone(),
                    wheel_formula,
                    price: stats.min_price,
                    availability,
                    is_active: true,
                }
            }
            Some(mut state) => {
                let mut changed = false;

                if state.series_slug.as_deref() != Some(series.slug.as_str()) {
                    state.series_slug = Some(series.slug.clone());
                    changed = true;
                }
                if state.category_slug.as_deref() != Some(category.slug.as_str()) {
                    state.category_slug = Some(category.slug.clone());
                    changed = true;
                }
                if !title.is_empty() && state.title != title {
                    state.title = title.to_string();
                    changed = true;
                }
                if state.model_code != key.model_code {
                    state.model_code = key.model_code.clone();
                    changed = true;
                }
                if state.config != key.config {
                    state.config = key.config.clone();
                    changed = true;
                }
                if state.wheel_formula != wheel_formula {
                    state.wheel_formula = wheel_formula;
                    changed = true;
                }
                if state.availability != availability {
                    state.availability = availability;
                    changed = true;
                }
                if state.price != stats.min_price {
                    state.price = stats.min_price;
                    changed = true;
                }
                if state.slug.is_empty() {
                    state.slug = computed_slug;
                    changed = true;
                }
                if !state.is_active {
                    state.is_active = true;
                    changed = true;
                }

                if changed {
                    report.updated_products += 1;
                    if self.mode.writes() {
                        self.conn.execute(
                            "UPDATE products SET slug = ?1, series_id = ?2, category_id = ?3,
                                 title = ?4, model_code = ?5, config = ?6, wheel_formula = ?7,
                                 price = ?8, availability = ?9, is_active = 1
                             WHERE id = ?10",
                            params![
                                state.slug,
                                series.id,
                                category.id,
                                state.title,
                                state.model_code,
                                state.config,
                                state.wheel_formula,
                                state.price.map(|p| p.to_string()),
                                state.availability.as_str(),
                                state.id,
                            ],
                        )?;
                    }
                }
                state
            }
        };

        let handle = ProductHandle { id: state.id, sku: sku.clone() };
        self.caches.product_by_sku.insert(sku_ci, state);
        Ok(handle)
    }

    fn load_product(&self, sku: &str) -> anyhow::Result<Option<ProductState>> {
        let row = self
            .conn
            .query_row(
                "SELECT p.id, p.slug, s.slug, c.slug, p.title, p.model_code, p.config,
                        p.wheel_formula, p.price, p.availability, p.is_active
                 FROM products p
                 LEFT JOIN series s ON s.id = p.series_id
                 LEFT JOIN categories c ON c.id = p.category_id
                 WHERE p.sku = ?1",
                params![sku],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, Option<String>>(2)?,
                        r.get::<_, Option<String>>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, String>(6)?,
                        r.get::<_, String>(7)?,
                        r.get::<_, Option<String>>(8)?,
                        r.get::<_, String>(9)?,
                        r.get::<_, bool>(10)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, slug, series_slug, category_slug, title, model_code, config, wheel, price, availability, is_active)) =
            row
        else {
            return Ok(None);
        };
        Ok(Some(ProductState {
            id: Some(id),
            slug,
            series_slug,
            category_slug,
            title,
            model_code,
            config,
            wheel_formula: wheel,
            price: price.as_deref().and_then(|p| p.parse().ok()),
            availability: Availability::from_str(&availability),
            is_active,
        }))
    }

    pub fn upsert_offer(
        &mut self,
        product: &ProductHandle,
        city: &EntityRef,
        key: &OfferKey,
        offer: &AggregatedOffer,
        source_file: &str,
        batch_token: &str,
        report: &mut StockImportReport,
    ) -> anyhow::Result<()> {
        let (Some(product_id), Some(city_id)) = (product.id, city.id) else {
            // Dry-run with a product or city that does not exist yet.
            report.created_offers += 1;
            return Ok(());
        };

        let price_text = key.price.map(|p| p.to_string());
        let existing: Option<i64> = match &price_text {
            Some(price) => self
                .conn
                .query_row(
                    "SELECT id FROM offers
                     WHERE product_id = ?1 AND city_id = ?2 AND price = ?3
                       AND year IS ?4 AND vat = ?5",
                    params![product_id, city_id, price, key.year, key.vat],
                    |r| r.get(0),
                )
                .optional()?,
            None => self
                .conn
                .query_row(
                    "SELECT id FROM offers
                     WHERE product_id = ?1 AND city_id = ?2 AND price IS NULL
                       AND year IS ?3 AND vat = ?4",
                    params![product_id, city_id, key.year, key.vat],
                    |r| r.get(0),
                )
                .optional()?,
        };

        let row_hash = offer_row_hash(&product.sku, &city.slug, key.price, key.year, &key.vat);

        match existing {
            Some(id) => {
                report.updated_offers += 1;
                self.touched_offers.insert(id);
                if self.mode.writes() {
                    self.conn.execute(
                        "UPDATE offers SET qty = ?1, currency = 'RUB', source_file = ?2,
                             source_row_hash = ?3, batch_token = ?4, updated_at = ?5,
                             is_active = 1
                         WHERE id = ?6",
                        params![offer.qty, source_file, row_hash, batch_token, self.now, id],
                    )?;
                }
            }
            None => {
                report.created_offers += 1;
                if self.mode.writes() {
                    self.conn.execute(
                        "INSERT INTO offers (product_id, city_id, qty, price, currency, vat,
                             year, source_file, source_row_hash, batch_token, updated_at,
                             is_active)
                         VALUES (?1, ?2, ?3, ?4, 'RUB', ?5, ?6, ?7, ?8, ?9, ?10, 1)",
                        params![
                            product_id,
                            city_id,
                            offer.qty,
                            price_text,
                            key.vat,
                            key.year,
                            source_file,
                            row_hash,
                            batch_token,
                            self.now,
                        ],
                    )?;
                    self.touched_offers.insert(self.conn.last_insert_rowid());
                }
            }
        }
        Ok(())
    }

    /// Deactivate active offers from this source file that the current batch
    /// did not touch. In dry-run the count excludes offers touched virtually.
    pub fn deactivate_missing(
        &mut self,
        source_file: &str,
        batch_token: &str,
        report: &mut StockImportReport,
    ) -> anyhow::Result<()> {
        if self.mode.writes() {
            let changed = self.conn.execute(
                "UPDATE offers SET is_active = 0
                 WHERE source_file = ?1 AND is_active = 1 AND batch_token <> ?2",
                params![source_file, batch_token],
            )?;
            report.deactivated_offers = changed as u32;
            return Ok(());
        }

        let mut stmt = self
            .conn
            .prepare("SELECT id FROM offers WHERE source_file = ?1 AND is_active = 1")?;
        let ids = stmt.query_map(params![source_file], |r| r.get::<_, i64>(0))?;
        let mut count = 0u32;
        for id in ids {
            if !self.touched_offers.contains(&id?) {
                count += 1;
            }
        }
        report.deactivated_offers = count;
        Ok(())
    }
}

/// Идентификатор товара в рамках прогона.
#[derive(Debug, Clone)]
pub struct ProductHandle {
    pub id: Option<i64>,
    pub sku: String,
}

fn normalize_slug(slug: &str, default: &str) -> String {
    let slug = slug.trim().to_lowercase();
    if slug.is_empty() {
        default.to_string()
    } else {
        slug
    }
}

/// Deterministic SKU and slug for a product key. Same inputs always hash to
/// the same identity, so reimports find their products.
pub fn product_identity(key: &ProductKey) -> (String, String) {
    let payload = format!(
        "{}|{}|{}|{}",
        key.brand_slug, key.category_slug, key.model_code, key.config
    );
    let digest = short_digest(&payload);
    let short = digest[..10].to_uppercase();

    let model_part = regex!(r"[^A-Z0-9]+")
        .replace_all(&key.model_code.to_uppercase(), "-")
        .trim_matches('-')
        .to_string();
    let model_part = if model_part.is_empty() { "MODEL".to_string() } else { model_part };
    let model_part = truncate_chars(&model_part, 30);

    let sku = truncate_chars(
        &format!("{}-{}-{}", key.brand_slug.to_uppercase(), model_part, short),
        100,
    );

    let base = {
        let primary = slugify(&format!("{}-{}", key.brand_slug, key.model_code));
        if primary.is_empty() {
            slugify(&format!("{}-{}", key.brand_slug, short.to_lowercase()))
        } else {
            primary
        }
    };
    let base = if base.is_empty() { "product".to_string() } else { base };
    let base = truncate_chars(&base, 40);
    let base = base.trim_matches('-');
    let slug = truncate_chars(&format!("{}-{}", base, &digest[..8]), 50)
        .trim_matches('-')
        .to_string();

    (sku, slug)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

// -----------------
// Read side used by the site and the CLI
// -----------------

pub fn get_product_by_sku(conn: &Connection, sku: &str) -> anyhow::Result<Option<Product>> {
    let product = conn
        .query_row(
            "SELECT id, sku, slug, series_id, category_id, title, model_code, config,
                    wheel_formula, price, availability, published, is_active
             FROM products WHERE sku = ?1",
            params![sku],
            |r| {
                Ok(Product {
                    id: r.get(0)?,
                    sku: r.get(1)?,
                    slug: r.get(2)?,
                    series_id: r.get(3)?,
                    category_id: r.get(4)?,
                    title: r.get(5)?,
                    model_code: r.get(6)?,
                    config: r.get(7)?,
                    wheel_formula: r.get(8)?,
                    price: r
                        .get::<_, Option<String>>(9)?
                        .as_deref()
                        .and_then(|p| p.parse().ok()),
                    availability: Availability::from_str(&r.get::<_, String>(10)?),
                    published: r.get(11)?,
                    is_active: r.get(12)?,
                })
            },
        )
        .optional()?;
    Ok(product)
}

pub fn list_offers(conn: &Connection, product_id: i64) -> anyhow::Result<Vec<Offer>> {
    let mut stmt = conn.prepare(
        "SELECT id, product_id, city_id, qty, price, currency, vat, year,
                source_file, source_row_hash, batch_token, updated_at, is_active
         FROM offers WHERE product_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![product_id], |r| {
        Ok(Offer {
            id: r.get(0)?,
            product_id: r.get(1)?,
            city_id: r.get(2)?,
            qty: r.get(3)?,
            price: r
                .get::<_, Option<String>>(4)?
                .as_deref()
                .and_then(|p| p.parse().ok()),
            currency: r.get(5)?,
            vat: r.get(6)?,
            year: r.get(7)?,
            source_file: r.get(8)?,
            source_row_hash: r.get(9)?,
            batch_token: r.get(10)?,
            updated_at: r.get(11)?,
            is_active: r.get(12)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn list_series(conn: &Connection) -> anyhow::Result<Vec<Series>> {
    let mut stmt = conn.prepare("SELECT id, name, slug FROM series ORDER BY name")?;
    let rows = stmt.query_map([], |r| {
        Ok(Series { id: r.get(0)?, name: r.get(1)?, slug: r.get(2)? })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn list_categories(conn: &Connection) -> anyhow::Result<Vec<Category>> {
    let mut stmt = conn.prepare("SELECT id, name, slug FROM categories ORDER BY name")?;
    let rows = stmt.query_map([], |r| {
        Ok(Category { id: r.get(0)?, name: r.get(1)?, slug: r.get(2)? })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn list_cities(conn: &Connection) -> anyhow::Result<Vec<City>> {
    let mut stmt = conn.prepare("SELECT id, name, slug, is_active FROM cities ORDER BY name")?;
    let rows = stmt.query_map([], |r| {
        Ok(City { id: r.get(0)?, name: r.get(1)?, slug: r.get(2)?, is_active: r.get(3)? })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn offer_row_hash(
    sku: &str,
    city_slug: &str,
    price: Option<Decimal>,
    year: Option<i32>,
    vat: &str,
) -> String {
    let payload = format!(
        "{}|{}|{}|{}|{}",
        sku,
        city_slug,
        price.map(|p| p.to_string()).unwrap_or_default(),
        year.map(|y| y.to_string()).unwrap_or_default(),
        vat
    );
    short_digest(&payload)
}
