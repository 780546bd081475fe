//! Загрузка xlsx и определение формата листа.

use std::collections::HashMap;
use std::io::{Read, Seek};
use std::path::Path;

use anyhow::{anyhow, Context};
use calamine::{open_workbook_auto, open_workbook_auto_from_rs, Data, Range, Reader};
use derive_more::Display;

use crate::normalize::{normalize_header, normalize_spaces};

/// Normalized header token -> column index, first occurrence wins.
pub type HeaderMap = HashMap<String, usize>;

/// Recognized sheet layouts. The vendor wide format may arrive without a
/// usable header row at all, in which case fixed column positions are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SheetFormat {
    #[display("normalized")]
    NormalizedTemplate,
    #[display("karfast")]
    VendorWide { fallback_positions: bool },
}

/// Open a workbook from disk and return the requested (or first) sheet.
pub fn load_range(path: &Path, sheet: Option<&str>) -> anyhow::Result<(String, Range<Data>)> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Не удалось открыть файл {}", path.display()))?;
    let name = select_sheet(&workbook.sheet_names(), sheet)?;
    let range = workbook
        .worksheet_range(&name)
        .with_context(|| format!("Не удалось прочитать лист {name}"))?;
    Ok((name, range))
}

/// Same as [`load_range`] for an in-memory workbook.
pub fn load_range_from_reader<R: Read + Seek + Clone>(
    reader: R,
    sheet: Option<&str>,
) -> anyhow::Result<(String, Range<Data>)> {
    let mut workbook =
        open_workbook_auto_from_rs(reader).context("Не удалось открыть книгу из буфера")?;
    let name = select_sheet(&workbook.sheet_names(), sheet)?;
    let range = workbook
        .worksheet_range(&name)
        .with_context(|| format!("Не удалось прочитать лист {name}"))?;
    Ok((name, range))
}

fn select_sheet(names: &[String], requested: Option<&str>) -> anyhow::Result<String> {
    match requested {
        None => names
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("В книге нет листов")),
        Some(wanted) => names
            .iter()
            .find(|n| n.as_str() == wanted)
            .or_else(|| names.iter().find(|n| n.eq_ignore_ascii_case(wanted)))
            .cloned()
            .ok_or_else(|| {
                anyhow!("Лист '{}' не найден. Доступные листы: {}", wanted, names.join(", "))
            }),
    }
}

/// Header row (row 0) as normalized tokens.
pub fn header_map(range: &Range<Data>) -> HeaderMap {
    let mut map = HeaderMap::new();
    let width = range.width();
    for col in 0..width {
        let token = normalize_header(&cell_str(range, 0, col));
        if !token.is_empty() {
            map.entry(token).or_insert(col);
        }
    }
    map
}

pub fn detect_format(headers: &HeaderMap) -> SheetFormat {
    if headers.contains_key("model_code") && headers.contains_key("city") {
        return SheetFormat::NormalizedTemplate;
    }
    let vendor_base = ["наименование", "модель", "комплектация", "наличие"]
        .iter()
        .all(|key| headers.contains_key(*key));
    let has_price = headers
        .keys()
        .any(|key| key.starts_with("цена") && key.contains("ндс"));
    if vendor_base && has_price {
        return SheetFormat::VendorWide { fallback_positions: false };
    }
    SheetFormat::VendorWide { fallback_positions: true }
}

pub fn cell<'a>(range: &'a Range<Data>, row: usize, col: usize) -> Option<&'a Data> {
    range.get((row, col))
}

/// Cell rendered as trimmed text; numbers lose a trailing ".0".
pub fn cell_str(range: &Range<Data>, row: usize, col: usize) -> String {
    match cell(range, row, col) {
        Some(Data::String(s)) => normalize_spaces(s),
        Some(Data::Float(f)) => {
            if f.fract() == 0.0 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Some(Data::Int(i)) => i.to_string(),
        Some(Data::Bool(b)) => b.to_string(),
        Some(Data::DateTime(dt)) => dt.as_f64().to_string(),
        Some(Data::DateTimeIso(s)) | Some(Data::DurationIso(s)) => normalize_spaces(s),
        Some(Data::Error(_)) | Some(Data::Empty) | None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_from_rows(rows: &[&[&str]]) -> Range<Data> {
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(1);
        let height = rows.len().max(1);
        let mut range = Range::new((0, 0), ((height - 1) as u32, (width - 1) as u32));
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if !value.is_empty() {
                    range.set_value((r as u32, c as u32), Data::String(value.to_string()));
                }
            }
        }
        range
    }

    #[test]
    fn test_detect_normalized_template() {
        let range = range_from_rows(&[&["model_code", "city", "qty", "price"]]);
        let headers = header_map(&range);
        assert_eq!(detect_format(&headers), SheetFormat::NormalizedTemplate);
    }

    #[test]
    fn test_detect_vendor_with_headers() {
        let range = range_from_rows(&[&[
            "Наименование",
            "Модель",
            "Фото",
            "Комплектация",
            "",
            "",
            "",
            "",
            "",
            "Цена с НДС, руб.",
            "Наличие",
        ]]);
        let headers = header_map(&range);
        assert_eq!(
            detect_format(&headers),
            SheetFormat::VendorWide { fallback_positions: false }
        );
    }

    #[test]
    fn test_detect_vendor_fallback() {
        let range = range_from_rows(&[&["Прайс-лист", "", "от 01.06.2025"]]);
        let headers = header_map(&range);
        assert_eq!(
            detect_format(&headers),
            SheetFormat::VendorWide { fallback_positions: true }
        );
    }

    #[test]
    fn test_select_sheet_unknown_lists_names() {
        let names = vec!["Table 1".to_string(), "Остатки".to_string()];
        let err = select_sheet(&names, Some("нет такого")).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("Table 1"));
        assert!(text.contains("Остатки"));
    }

    #[test]
    fn test_select_sheet_defaults_to_first() {
        let names = vec!["Table 1".to_string(), "Other".to_string()];
        assert_eq!(select_sheet(&names, None).unwrap(), "Table 1");
        assert_eq!(select_sheet(&names, Some("table 1")).unwrap(), "Table 1");
    }

    #[test]
    fn test_cell_str_number_formatting() {
        let mut range: Range<Data> = Range::new((0, 0), (0, 1));
        range.set_value((0, 0), Data::Float(8590000.0));
        range.set_value((0, 1), Data::Float(12.5));
        assert_eq!(cell_str(&range, 0, 0), "8590000");
        assert_eq!(cell_str(&range, 0, 1), "12.5");
    }

}
