//! Точка входа импорта остатков: разбор, агрегация, апсерт, отчёт.

use std::io::{Read, Seek};
use std::path::Path;

use calamine::{Data, Range};
use rusqlite::Connection;
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::parse::parse_rows;
use crate::report::StockImportReport;
use crate::store::{Mode, Upserter};
use crate::workbook;

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub sheet: Option<String>,
    pub dry_run: bool,
    pub deactivate_missing: bool,
}

/// Import offers from an xlsx file on disk.
pub fn import_stock(
    conn: &mut Connection,
    file: &Path,
    file_name: Option<&str>,
    options: &ImportOptions,
) -> anyhow::Result<StockImportReport> {
    let resolved_name = match file_name {
        Some(name) => name.to_string(),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "uploaded.xlsx".to_string()),
    };
    let (sheet_name, range) = workbook::load_range(file, options.sheet.as_deref())?;
    import_range(conn, &range, resolved_name, sheet_name, options)
}

/// Import offers from an in-memory xlsx workbook.
pub fn import_stock_from_reader<R: Read + Seek + Clone>(
    conn: &mut Connection,
    reader: R,
    file_name: Option<&str>,
    options: &ImportOptions,
) -> anyhow::Result<StockImportReport> {
    let resolved_name = file_name.unwrap_or("uploaded.xlsx").to_string();
    let (sheet_name, range) = workbook::load_range_from_reader(reader, options.sheet.as_deref())?;
    import_range(conn, &range, resolved_name, sheet_name, options)
}

/// Import offers from an already loaded sheet range.
pub fn import_range(
    conn: &mut Connection,
    range: &Range<Data>,
    file_name: String,
    sheet_name: String,
    options: &ImportOptions,
) -> anyhow::Result<StockImportReport> {
    let batch_token = Uuid::new_v4().simple().to_string();
    let mut report =
        StockImportReport::new(file_name.clone(), sheet_name, batch_token.clone(), options.dry_run);

    let rows = parse_rows(range, &mut report);
    report.parsed_rows = rows.len() as u32;
    let (offers, product_stats) = aggregate(rows);
    log::info!(
        "Импорт {}: строк={}, позиций={}, товаров={}",
        file_name,
        report.parsed_rows,
        offers.len(),
        product_stats.len()
    );

    if options.dry_run {
        let mut upserter = Upserter::new(conn, Mode::DryRun);
        apply_offers(&mut upserter, &offers, &product_stats, &file_name, &batch_token, &mut report)?;
        if options.deactivate_missing {
            upserter.deactivate_missing(&file_name, &batch_token, &mut report)?;
        }
        return Ok(report);
    }

    let tx = conn.transaction()?;
    {
        let mut upserter = Upserter::new(&tx, Mode::Apply);
        apply_offers(&mut upserter, &offers, &product_stats, &file_name, &batch_token, &mut report)?;
        if options.deactivate_missing {
            upserter.deactivate_missing(&file_name, &batch_token, &mut report)?;
        }
    }
    tx.commit()?;

    log::info!(
        "Импорт {} завершён: создано товаров={}, предложений={}, обновлено предложений={}, деактивировано={}",
        file_name,
        report.created_products,
        report.created_offers,
        report.updated_offers,
        report.deactivated_offers
    );
    Ok(report)
}

fn apply_offers(
    upserter: &mut Upserter<'_>,
    offers: &indexmap::IndexMap<crate::aggregate::OfferKey, crate::aggregate::AggregatedOffer>,
    product_stats: &std::collections::HashMap<crate::aggregate::ProductKey, crate::aggregate::ProductStats>,
    file_name: &str,
    batch_token: &str,
    report: &mut StockImportReport,
) -> anyhow::Result<()> {
    for (key, offer) in offers {
        let series = upserter.ensure_series(&key.brand_slug, report)?;
        let category = upserter.ensure_category(&key.category_slug, report)?;
        let city = upserter.ensure_city(&offer.row.city_name, &key.city_slug, report)?;

        let product_key = key.product_key();
        let stats = product_stats.get(&product_key).cloned().unwrap_or_default();
        let product =
            upserter.upsert_product(&series, &category, &product_key, &offer.row.title, &stats, report)?;

        upserter.upsert_offer(&product, &city, key, offer, file_name, batch_token, report)?;
    }
    Ok(())
}
