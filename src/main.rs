use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail};
use rusqlite::Connection;

use stock_import::{import_stock, ImportOptions};

const USAGE: &str = "Использование: stock-import --file <прайс.xlsx> [--db <путь>] \
[--sheet <имя>] [--dry-run] [--deactivate-missing] [--json]";

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliArgs {
    file: PathBuf,
    db: PathBuf,
    sheet: Option<String>,
    dry_run: bool,
    deactivate_missing: bool,
    json: bool,
}

fn env_flag(key: &str, default_value: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default_value,
        },
        Err(_) => default_value,
    }
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut file: Option<PathBuf> = None;
    let mut db: Option<PathBuf> = None;
    let mut sheet: Option<String> = None;
    let mut dry_run = env_flag("STOCK_IMPORT_DRY_RUN", false);
    let mut deactivate_missing = env_flag("STOCK_IMPORT_DEACTIVATE_MISSING", false);
    let mut json = false;

    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--file" => {
                file = Some(PathBuf::from(
                    it.next().ok_or_else(|| anyhow!("--file требует значение"))?,
                ));
            }
            "--db" => {
                db = Some(PathBuf::from(
                    it.next().ok_or_else(|| anyhow!("--db требует значение"))?,
                ));
            }
            "--sheet" => {
                sheet = Some(
                    it.next()
                        .ok_or_else(|| anyhow!("--sheet требует значение"))?
                        .clone(),
                );
            }
            "--dry-run" => dry_run = true,
            "--deactivate-missing" => deactivate_missing = true,
            "--json" => json = true,
            other => bail!("Неизвестный аргумент '{other}'\n{USAGE}"),
        }
    }

    let file = file.ok_or_else(|| anyhow!("Не указан файл прайса\n{USAGE}"))?;
    Ok(CliArgs {
        file,
        db: db.unwrap_or_else(|| PathBuf::from("storage/catalog.db")),
        sheet,
        dry_run,
        deactivate_missing,
        json,
    })
}

fn main() -> Result<(), anyhow::Error> {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let args = parse_args(&args)?;

    if !args.file.is_file() {
        bail!("Файл не найден: {}", args.file.display());
    }
    if let Some(parent) = args.db.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut conn = Connection::open(&args.db)?;
    stock_import::store::init_schema(&conn)?;

    let options = ImportOptions {
        sheet: args.sheet.clone(),
        dry_run: args.dry_run,
        deactivate_missing: args.deactivate_missing,
    };
    let report = import_stock(&mut conn, &args.file, None, &options)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args_full() {
        let parsed = parse_args(&args(&[
            "--file",
            "прайс.xlsx",
            "--db",
            "catalog.db",
            "--sheet",
            "Table 1",
            "--dry-run",
            "--deactivate-missing",
            "--json",
        ]))
        .unwrap();
        assert_eq!(parsed.file, PathBuf::from("прайс.xlsx"));
        assert_eq!(parsed.db, PathBuf::from("catalog.db"));
        assert_eq!(parsed.sheet.as_deref(), Some("Table 1"));
        assert!(parsed.dry_run);
        assert!(parsed.deactivate_missing);
        assert!(parsed.json);
    }

    #[test]
    fn test_parse_args_defaults() {
        let parsed = parse_args(&args(&["--file", "прайс.xlsx"])).unwrap();
        assert_eq!(parsed.db, PathBuf::from("storage/catalog.db"));
        assert_eq!(parsed.sheet, None);
        assert!(!parsed.dry_run);
        assert!(!parsed.json);
    }

    #[test]
    fn test_parse_args_requires_file() {
        assert!(parse_args(&args(&["--dry-run"])).is_err());
        assert!(parse_args(&args(&["--file"])).is_err());
        assert!(parse_args(&args(&["--wat"])).is_err());
    }
}
