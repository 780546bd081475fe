//! Разбор строк прайс-листа в нормализованные позиции.

use calamine::{Data, Range};
use rust_decimal::Decimal;

use crate::normalize::{
    self, city_slug, extract_year, normalize_city_name, normalize_spaces, parse_price_number,
    parse_price_text, slugify,
};
use crate::report::StockImportReport;
use crate::workbook::{cell, cell_str, detect_format, header_map, HeaderMap, SheetFormat};

pub const DEFAULT_VAT: &str = "с НДС";

/// One importable stock position after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStockRow {
    pub row_number: u32,
    pub title: String,
    pub brand_slug: String,
    pub category_slug: String,
    pub model_code: String,
    pub config: String,
    pub city_name: String,
    pub city_slug: String,
    pub qty: u32,
    pub price: Option<Decimal>,
    pub vat: String,
    pub year: Option<i32>,
}

/// Текущая секция вендорского листа: бренд и категория наследуются от
/// последнего разделителя.
#[derive(Debug, Clone, Default)]
pub struct SectionState {
    brand: Option<String>,
    category: Option<String>,
}

impl SectionState {
    /// Divider row: remember brand/category hints from its title.
    pub fn update(&mut self, title: &str) {
        let upper = title.trim().to_uppercase();
        if upper.is_empty() {
            return;
        }
        if upper.contains("SHACMAN") {
            self.brand = Some("shacman".to_string());
        } else if upper.contains("DAYUN") {
            self.brand = Some("dayun".to_string());
        }
        if upper.starts_with("САМОСВАЛЫ") {
            self.category = Some("samosvaly".to_string());
        } else if upper.starts_with("ТЯГАЧИ") {
            self.category = Some("tyagachi".to_string());
        } else if upper.starts_with("АВТОБЕТОНОСМЕС") {
            self.category = Some("abs".to_string());
        } else if upper.starts_with("КМУ") {
            self.category = Some("kmu".to_string());
        } else if upper.starts_with("ЗЕРНОВОЗЫ") {
            self.category = Some("zernovozy".to_string());
        }
    }

    /// Brand slug for a data row: its own title wins over the section.
    pub fn detect_brand(&self, title: &str) -> String {
        let upper = title.trim().to_uppercase();
        if upper.contains("DAYUN") {
            return "dayun".to_string();
        }
        if upper.contains("SHACMAN") {
            return "shacman".to_string();
        }
        self.brand.clone().unwrap_or_else(|| "other".to_string())
    }

    pub fn detect_category(&self, title: &str) -> String {
        let lower = title.trim().to_lowercase();
        if lower.starts_with("самосвал") {
            return "samosvaly".to_string();
        }
        if lower.starts_with("тягач") {
            return "tyagachi".to_string();
        }
        if lower.contains("автобетоносмес") {
            return "abs".to_string();
        }
        if lower.contains("кму") {
            return "kmu".to_string();
        }
        if lower.contains("зерновоз") {
            return "zernovozy".to_string();
        }
        if lower.contains("трактор") {
            return "traktory".to_string();
        }
        if lower.contains("фургон") {
            return "furgony".to_string();
        }
        self.category.clone().unwrap_or_else(|| "tehnika".to_string())
    }
}

/// Detect the sheet format and parse its data rows. Row-level problems go
/// into the report; the returned rows are importable.
pub fn parse_rows(range: &Range<Data>, report: &mut StockImportReport) -> Vec<ParsedStockRow> {
    let headers = header_map(range);
    let format = detect_format(&headers);
    log::info!("Формат листа '{}': {}", report.sheet_name, format);
    match format {
        SheetFormat::NormalizedTemplate => parse_template_rows(range, &headers, report),
        SheetFormat::VendorWide { fallback_positions } => {
            parse_vendor_rows(range, &headers, fallback_positions, report)
        }
    }
}

struct VendorColumns {
    title: usize,
    model: usize,
    config: usize,
    price: usize,
    city: usize,
}

impl VendorColumns {
    // Column letters observed in the real vendor file: A, B, D, J, K.
    const FALLBACK: VendorColumns = VendorColumns {
        title: 0,
        model: 1,
        config: 3,
        price: 9,
        city: 10,
    };

    fn from_headers(headers: &HeaderMap) -> Self {
        let price = headers
            .iter()
            .find(|(key, _)| key.starts_with("цена") && key.contains("ндс"))
            .map(|(_, idx)| *idx)
            .unwrap_or(Self::FALLBACK.price);
        VendorColumns {
            title: headers.get("наименование").copied().unwrap_or(Self::FALLBACK.title),
            model: headers.get("модель").copied().unwrap_or(Self::FALLBACK.model),
            config: headers.get("комплектация").copied().unwrap_or(Self::FALLBACK.config),
            price,
            city: headers.get("наличие").copied().unwrap_or(Self::FALLBACK.city),
        }
    }
}

fn parse_vendor_rows(
    range: &Range<Data>,
    headers: &HeaderMap,
    fallback_positions: bool,
    report: &mut StockImportReport,
) -> Vec<ParsedStockRow> {
    let cols = if fallback_positions {
        VendorColumns::FALLBACK
    } else {
        VendorColumns::from_headers(headers)
    };

    let mut state = SectionState::default();
    let mut parsed = Vec::new();

    for row in 1..range.height() {
        let row_number = (row + 1) as u32;
        let title_raw = cell_str(range, row, cols.title);
        let model_raw = cell_str(range, row, cols.model);
        let config_raw = cell_str(range, row, cols.config);
        let price_raw = cell_str(range, row, cols.price);
        let city_raw = cell_str(range, row, cols.city);

        if [&title_raw, &model_raw, &config_raw, &price_raw, &city_raw]
            .iter()
            .all(|v| v.is_empty())
        {
            report.skipped_rows += 1;
            continue;
        }

        // Section divider: a row without a model code.
        if model_raw.is_empty() {
            state.update(&title_raw);
            report.skipped_rows += 1;
            continue;
        }

        let result = (|| -> Result<ParsedStockRow, String> {
            let model_code = normalize_model_code(&model_raw)?;
            let config = normalize_spaces(&config_raw);
            let year = extract_year(&[&config, &model_raw]);
            let city_name = normalize_city_name(&city_raw);
            if city_name.is_empty() {
                return Err("City is empty".to_string());
            }
            let city_slug = city_slug(&city_name);
            let price = price_from_cell(range, row, cols.price);

            let brand_slug = state.detect_brand(&title_raw);
            let category_slug = state.detect_category(&title_raw);
            let title = fallback_title(&title_raw, &brand_slug, &model_code);

            Ok(ParsedStockRow {
                row_number,
                title,
                brand_slug,
                category_slug,
                model_code,
                config,
                city_name,
                city_slug,
                qty: 1,
                price,
                vat: DEFAULT_VAT.to_string(),
                year,
            })
        })();

        match result {
            Ok(row) => parsed.push(row),
            Err(message) => report.add_error(Some(row_number), message),
        }
    }

    parsed
}

fn parse_template_rows(
    range: &Range<Data>,
    headers: &HeaderMap,
    report: &mut StockImportReport,
) -> Vec<ParsedStockRow> {
    let idx_brand = headers.get("brand").copied();
    let idx_category = headers.get("category").copied();
    let idx_title = headers.get("title").copied();
    let idx_model = headers.get("model_code").or_else(|| headers.get("model")).copied();
    let idx_config = headers.get("config").copied();
    let idx_city = headers.get("city").copied();
    let idx_qty = headers.get("qty").or_else(|| headers.get("quantity")).copied();
    let idx_price = headers.get("price").copied();
    let idx_vat = headers.get("vat").copied();
    let idx_year = headers.get("year").copied();

    let get = |row: usize, idx: Option<usize>| -> String {
        idx.map(|col| cell_str(range, row, col)).unwrap_or_default()
    };

    let mut parsed = Vec::new();

    for row in 1..range.height() {
        let row_number = (row + 1) as u32;
        let model_raw = get(row, idx_model);
        if model_raw.is_empty() {
            // Blank and divider rows alike carry nothing importable here.
            report.skipped_rows += 1;
            continue;
        }

        let result = (|| -> Result<ParsedStockRow, String> {
            let brand_raw = get(row, idx_brand);
            let category_raw = get(row, idx_category);
            let title_raw = get(row, idx_title);
            let config_raw = get(row, idx_config);
            let city_raw = get(row, idx_city);
            let qty_raw = get(row, idx_qty);
            let vat_raw = get(row, idx_vat);
            let year_raw = get(row, idx_year);

            let model_code = normalize_model_code(&model_raw)?;
            let config = normalize_spaces(&config_raw);

            let brand_slug = non_empty_or(slugify(&brand_raw), "other");
            let category_slug = non_empty_or(slugify(&category_raw), "tehnika");

            let city_name = normalize_city_name(&city_raw);
            if city_name.is_empty() {
                return Err("City is empty".to_string());
            }
            let city_slug = city_slug(&city_name);

            let qty = parse_qty(&qty_raw)?;
            let price = idx_price.and_then(|col| price_from_cell(range, row, col));
            let vat = non_empty_or(vat_raw, DEFAULT_VAT);

            let year = normalize::parse_year(&year_raw)
                .or_else(|| extract_year(&[&config, &model_raw]));

            let title = fallback_title(&title_raw, &brand_slug, &model_code);

            Ok(ParsedStockRow {
                row_number,
                title,
                brand_slug,
                category_slug,
                model_code,
                config,
                city_name,
                city_slug,
                qty,
                price,
                vat,
                year,
            })
        })();

        match result {
            Ok(row) => parsed.push(row),
            Err(message) => report.add_error(Some(row_number), message),
        }
    }

    parsed
}

fn normalize_model_code(value: &str) -> Result<String, String> {
    let model = value.trim().to_uppercase();
    if model.is_empty() {
        return Err("Model code is empty".to_string());
    }
    Ok(model)
}

fn parse_qty(value: &str) -> Result<u32, String> {
    let text = value.trim();
    if text.is_empty() {
        return Ok(1);
    }
    text.parse::<u32>().map_err(|_| format!("Invalid qty '{text}'"))
}

fn fallback_title(title_raw: &str, brand_slug: &str, model_code: &str) -> String {
    let title = title_raw.trim();
    if title.is_empty() {
        format!("{} {}", brand_slug.to_uppercase(), model_code)
    } else {
        title.to_string()
    }
}

fn non_empty_or(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

/// Price cell: numeric cells go through decimal conversion, text through the
/// tolerant parser. Unparseable values degrade to "no price".
fn price_from_cell(range: &Range<Data>, row: usize, col: usize) -> Option<Decimal> {
    match cell(range, row, col) {
        Some(Data::Float(f)) => parse_price_number(*f),
        Some(Data::Int(i)) => parse_price_number(*i as f64),
        Some(Data::String(s)) => parse_price_text(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn range_from_rows(rows: &[Vec<Data>]) -> Range<Data> {
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(1);
        let height = rows.len().max(1);
        let mut range = Range::new((0, 0), ((height - 1) as u32, (width - 1) as u32));
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if !matches!(value, Data::Empty) {
                    range.set_value((r as u32, c as u32), value.clone());
                }
            }
        }
        range
    }

    fn s(value: &str) -> Data {
        Data::String(value.to_string())
    }

    fn vendor_row(title: &str, model: &str, config: &str, price: &str, city: &str) -> Vec<Data> {
        vec![
            s(title),
            s(model),
            Data::Empty,
            s(config),
            Data::Empty,
            Data::Empty,
            Data::Empty,
            Data::Empty,
            Data::Empty,
            s(price),
            s(city),
        ]
    }

    fn vendor_header() -> Vec<Data> {
        vec![
            s("Наименование"),
            s("Модель"),
            s("Фото"),
            s("Комплектация"),
            Data::Empty,
            Data::Empty,
            Data::Empty,
            Data::Empty,
            Data::Empty,
            s("Цена с НДС, руб."),
            s("Наличие"),
        ]
    }

    fn new_report() -> StockImportReport {
        StockImportReport::new("t.xlsx".into(), "Table 1".into(), "token".into(), false)
    }

    #[test]
    fn test_vendor_divider_inherits_brand_and_category() {
        let range = range_from_rows(&[
            vendor_header(),
            vendor_row("САМОСВАЛЫ SHACMAN", "", "", "", ""),
            vendor_row("Самосвал X3000", "SX3258", "6х4, 2023", "8 590 000 ₽", "г.Москва"),
            vendor_row("ТЯГАЧИ SHACMAN", "", "", "", ""),
            vendor_row("", "X6000", "4х2", "7 100 000", "г. Саратов"),
        ]);
        let mut report = new_report();
        let rows = parse_rows(&range, &mut report);

        assert_eq!(rows.len(), 2);
        assert_eq!(report.skipped_rows, 2);

        assert_eq!(rows[0].brand_slug, "shacman");
        assert_eq!(rows[0].category_slug, "samosvaly");
        assert_eq!(rows[0].model_code, "SX3258");
        assert_eq!(rows[0].city_name, "Москва");
        assert_eq!(rows[0].city_slug, "moskva");
        assert_eq!(rows[0].price, Some(dec!(8590000.00)));
        assert_eq!(rows[0].year, Some(2023));
        assert_eq!(rows[0].qty, 1);

        // empty title: brand/category inherited from the last divider
        assert_eq!(rows[1].brand_slug, "shacman");
        assert_eq!(rows[1].category_slug, "tyagachi");
        assert_eq!(rows[1].title, "SHACMAN X6000");
        assert_eq!(rows[1].city_slug, "saratov");
    }

    #[test]
    fn test_vendor_row_title_wins_over_section() {
        let range = range_from_rows(&[
            vendor_header(),
            vendor_row("САМОСВАЛЫ SHACMAN", "", "", "", ""),
            vendor_row("Тягач DAYUN", "DYX3250", "", "", "г.Казань"),
        ]);
        let mut report = new_report();
        let rows = parse_rows(&range, &mut report);
        assert_eq!(rows[0].brand_slug, "dayun");
        assert_eq!(rows[0].category_slug, "tyagachi");
        assert_eq!(rows[0].price, None);
    }

    #[test]
    fn test_vendor_empty_city_is_row_error() {
        let range = range_from_rows(&[
            vendor_header(),
            vendor_row("Самосвал SHACMAN X3000", "SX3258", "", "8 590 000", ""),
            vendor_row("Самосвал SHACMAN X3000", "SX3258", "", "8 590 000", "г.Москва"),
        ]);
        let mut report = new_report();
        let rows = parse_rows(&range, &mut report);

        assert_eq!(rows.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].row, Some(2));
        assert_eq!(report.errors[0].message, "City is empty");
    }

    #[test]
    fn test_vendor_fallback_positions_without_headers() {
        let range = range_from_rows(&[
            vec![s("Прайс-лист от 01.06.2025")],
            vendor_row("Самосвал SHACMAN X3000", "SX3258", "6х4", "8 590 000", "г.Москва"),
        ]);
        let mut report = new_report();
        let rows = parse_rows(&range, &mut report);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].model_code, "SX3258");
    }

    #[test]
    fn test_template_rows() {
        let range = range_from_rows(&[
            vec![
                s("brand"),
                s("category"),
                s("title"),
                s("model_code"),
                s("config"),
                s("city"),
                s("qty"),
                s("price"),
                s("vat"),
                s("year"),
            ],
            vec![
                s("Shacman"),
                s("Тягачи"),
                s("Тягач X6000"),
                s("x6000"),
                s("4х2"),
                s("г. Казань"),
                Data::Float(3.0),
                Data::Float(7_100_000.0),
                s(""),
                Data::Float(2024.0),
            ],
            vec![
                s(""),
                s(""),
                s(""),
                s("DYX3250"),
                s(""),
                s("Москва"),
                s(""),
                s("нет цены"),
                s("без НДС"),
                s(""),
            ],
        ]);
        let mut report = new_report();
        let rows = parse_rows(&range, &mut report);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].brand_slug, "shacman");
        assert_eq!(rows[0].category_slug, "tyagachi");
        assert_eq!(rows[0].model_code, "X6000");
        assert_eq!(rows[0].qty, 3);
        assert_eq!(rows[0].price, Some(dec!(7100000.00)));
        assert_eq!(rows[0].vat, DEFAULT_VAT);
        assert_eq!(rows[0].year, Some(2024));

        assert_eq!(rows[1].brand_slug, "other");
        assert_eq!(rows[1].category_slug, "tehnika");
        assert_eq!(rows[1].title, "OTHER DYX3250");
        assert_eq!(rows[1].qty, 1);
        assert_eq!(rows[1].price, None);
        assert_eq!(rows[1].vat, "без НДС");
    }

    #[test]
    fn test_template_invalid_qty_is_row_error() {
        let range = range_from_rows(&[
            vec![s("model_code"), s("city"), s("qty")],
            vec![s("X3000"), s("Москва"), s("много")],
            vec![s("X3000"), s("Москва"), s("-2")],
            vec![s("X3000"), s("Москва"), s("4294967296")],
            vec![s("X3000"), s("Москва"), s("2")],
        ]);
        let mut report = new_report();
        let rows = parse_rows(&range, &mut report);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].qty, 2);
        assert_eq!(report.errors.len(), 3);
        assert_eq!(report.errors[0].message, "Invalid qty 'много'");
        assert_eq!(report.errors[1].row, Some(3));
        assert_eq!(report.errors[2].message, "Invalid qty '4294967296'");
    }

    #[test]
    fn test_year_from_config_fallback() {
        let range = range_from_rows(&[
            vec![s("model_code"), s("city"), s("config"), s("year")],
            vec![s("X3000"), s("Москва"), s("комплектация 2022 года"), s("")],
        ]);
        let mut report = new_report();
        let rows = parse_rows(&range, &mut report);
        assert_eq!(rows[0].year, Some(2022));
    }
}
