//! Чистые нормализаторы текста и значений из прайс-листов.

use lazy_regex::regex;
use md5::{Digest, Md5};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// Collapse whitespace (including non-breaking spaces) and trim.
pub fn normalize_spaces(value: &str) -> String {
    let text = value.replace('\u{a0}', " ");
    itertools::join(text.split_whitespace(), " ")
}

/// Header cell -> normalized token: lowercase, punctuation stripped,
/// spaces replaced with underscores ("Цена с НДС, руб." -> "цена_с_ндс_руб").
pub fn normalize_header(value: &str) -> String {
    let text = normalize_spaces(&value.to_lowercase());
    let text: String = text
        .chars()
        .filter(|c| {
            c.is_ascii_digit()
                || c.is_ascii_lowercase()
                || ('а'..='я').contains(c)
                || *c == 'ё'
                || *c == '_'
                || *c == ' '
        })
        .collect();
    normalize_spaces(&text).replace(' ', "_")
}

/// Strip the leading "г." / "г " prefix from a city cell.
pub fn normalize_city_name(value: &str) -> String {
    let text = normalize_spaces(value);
    if text.is_empty() {
        return text;
    }
    let stripped = regex!(r"(?i)^г\.?\s*").replace(&text, "");
    stripped.trim().to_string()
}

/// Canonical wheel formula: "6 Х 4" / "6×4" -> "6x4".
pub fn normalize_wheel_formula(value: &str) -> String {
    let raw = value.trim().to_lowercase().replace(['×', 'х'], "x").replace(' ', "");
    raw.chars().filter(|c| c.is_ascii_digit() || *c == 'x').collect()
}

/// First wheel-formula looking fragment in the given texts, canonicalized.
pub fn extract_wheel_formula(texts: &[&str]) -> Option<String> {
    for text in texts {
        if let Some(found) = regex!(r"(?i)\d\s*[x×х]\s*\d").find(text) {
            let formula = normalize_wheel_formula(found.as_str());
            if !formula.is_empty() {
                return Some(formula);
            }
        }
    }
    None
}

static RU_TRANSLIT: &[(char, &str)] = &[
    ('а', "a"),
    ('б', "b"),
    ('в', "v"),
    ('г', "g"),
    ('д', "d"),
    ('е', "e"),
    ('ё', "yo"),
    ('ж', "zh"),
    ('з', "z"),
    ('и', "i"),
    ('й', "y"),
    ('к', "k"),
    ('л', "l"),
    ('м', "m"),
    ('н', "n"),
    ('о', "o"),
    ('п', "p"),
    ('р', "r"),
    ('с', "s"),
    ('т', "t"),
    ('у', "u"),
    ('ф', "f"),
    ('х', "kh"),
    ('ц', "ts"),
    ('ч', "ch"),
    ('ш', "sh"),
    ('щ', "shch"),
    ('ъ', ""),
    ('ы', "y"),
    ('ь', ""),
    ('э', "e"),
    ('ю', "yu"),
    ('я', "ya"),
];

pub fn transliterate_ru(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        let lower = ch.to_lowercase().next().unwrap_or(ch);
        match RU_TRANSLIT.iter().find(|(c, _)| *c == lower) {
            Some((_, repl)) => out.push_str(repl),
            None => out.push(ch),
        }
    }
    out
}

fn ascii_slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_dash = true;
        }
    }
    out
}

/// ASCII slug with RU transliteration fallback.
pub fn slugify(text: &str) -> String {
    let base = ascii_slug(text);
    if !base.is_empty() {
        return base;
    }
    ascii_slug(&transliterate_ru(text))
}

/// Every city gets a deterministic non-empty slug, even when
/// transliteration produces nothing.
pub fn city_slug(city_name: &str) -> String {
    let slug = slugify(city_name);
    if !slug.is_empty() {
        return slug;
    }
    format!("city-{}", &short_digest(city_name)[..10])
}

/// Lowercase md5 hex digest of the payload.
pub fn short_digest(payload: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First 4-digit year in the 2000-2099 range found in any of the texts.
pub fn extract_year(texts: &[&str]) -> Option<i32> {
    for text in texts {
        if text.is_empty() {
            continue;
        }
        if let Some(caps) = regex!(r"(20\d{2})").captures(text) {
            if let Ok(year) = caps[1].parse::<i32>() {
                if (2000..=2099).contains(&year) {
                    return Some(year);
                }
            }
        }
    }
    None
}

/// Explicit year cell: plain integer in a sane range, anything else -> None.
pub fn parse_year(value: &str) -> Option<i32> {
    let year = value.trim().parse::<i32>().ok()?;
    (1900..=2100).contains(&year).then_some(year)
}

/// Tolerant price parsing: keep digits and separators, a single comma
/// without a dot is a decimal separator, otherwise separators are
/// thousands markers. Unparseable input is "no price", never an error.
pub fn parse_price_text(value: &str) -> Option<Decimal> {
    let text = value.trim();
    if text.is_empty() {
        return None;
    }

    let digits: String = text.chars().filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',').collect();
    if digits.is_empty() {
        return None;
    }

    let commas = digits.matches(',').count();
    let dots = digits.matches('.').count();
    let digits = if commas == 1 && dots == 0 {
        digits.replace(',', ".")
    } else {
        digits.replace([',', '.'], "")
    };

    digits.parse::<Decimal>().ok().map(quantize_price)
}

pub fn parse_price_number(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value).map(quantize_price)
}

/// Round to 2 decimal places and pin the scale so that equal prices
/// always render identically ("8590000.00").
pub fn quantize_price(price: Decimal) -> Decimal {
    let mut price = price.round_dp(2);
    price.rescale(2);
    price
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_spaces() {
        assert_eq!(normalize_spaces("  Самосвал\u{a0} SHACMAN   X3000 "), "Самосвал SHACMAN X3000");
        assert_eq!(normalize_spaces(""), "");
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("Цена с НДС, руб."), "цена_с_ндс_руб");
        assert_eq!(normalize_header("  Model_Code "), "model_code");
        assert_eq!(normalize_header("Наличие"), "наличие");
    }

    #[test]
    fn test_normalize_city_name() {
        assert_eq!(normalize_city_name("г.Москва"), "Москва");
        assert_eq!(normalize_city_name("г. Саратов"), "Саратов");
        assert_eq!(normalize_city_name("Г Казань"), "Казань");
        assert_eq!(normalize_city_name("Новосибирск"), "Новосибирск");
    }

    #[test]
    fn test_normalize_wheel_formula() {
        assert_eq!(normalize_wheel_formula("6х4"), "6x4");
        assert_eq!(normalize_wheel_formula("6 × 4"), "6x4");
        assert_eq!(normalize_wheel_formula("8X4"), "8x4");
        assert_eq!(normalize_wheel_formula(""), "");
    }

    #[test]
    fn test_extract_wheel_formula() {
        assert_eq!(
            extract_wheel_formula(&["Самосвал 6х4, 2023", "X3000"]),
            Some("6x4".to_string())
        );
        assert_eq!(extract_wheel_formula(&["базовая комплектация"]), None);
    }

    #[test]
    fn test_slugify_transliterates() {
        assert_eq!(slugify("Москва"), "moskva");
        assert_eq!(slugify("Саратов"), "saratov");
        assert_eq!(slugify("SHACMAN X3000"), "shacman-x3000");
        assert_eq!(slugify("Набережные Челны"), "naberezhnye-chelny");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn test_city_slug_never_empty() {
        assert_eq!(city_slug("Москва"), "moskva");
        let fallback = city_slug("***");
        assert!(fallback.starts_with("city-"));
        assert_eq!(fallback, city_slug("***"));
    }

    #[test]
    fn test_extract_year() {
        assert_eq!(extract_year(&["Комплектация: базовая 2023"]), Some(2023));
        assert_eq!(extract_year(&["", "X3000 2021 г."]), Some(2021));
        assert_eq!(extract_year(&["без года"]), None);
        // 1999 не попадает в диапазон 20xx
        assert_eq!(extract_year(&["модель 1999"]), None);
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("2023"), Some(2023));
        assert_eq!(parse_year(" 2024 "), Some(2024));
        assert_eq!(parse_year("23"), None);
        assert_eq!(parse_year("не год"), None);
    }

    #[test]
    fn test_parse_price_text() {
        assert_eq!(parse_price_text("8 590 000 ₽"), Some(dec!(8590000.00)));
        assert_eq!(parse_price_text("12,5"), Some(dec!(12.50)));
        assert_eq!(parse_price_text("1.234.567"), Some(dec!(1234567.00)));
        assert_eq!(parse_price_text(""), None);
        assert_eq!(parse_price_text("по запросу"), None);
    }

    #[test]
    fn test_parse_price_number() {
        assert_eq!(parse_price_number(8_590_000.0), Some(dec!(8590000.00)));
        assert_eq!(parse_price_number(12.5), Some(dec!(12.50)));
    }

    #[test]
    fn test_quantize_price_pins_scale() {
        assert_eq!(quantize_price(dec!(12.5)).to_string(), "12.50");
        assert_eq!(quantize_price(dec!(8590000)).to_string(), "8590000.00");
    }
}
