use serde::Serialize;

/// Problem tied to a single source row. Never aborts the import.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RowIssue {
    pub row: Option<u32>,
    pub message: String,
}

/// Итог одного прогона импорта остатков.
#[derive(Serialize, Debug, Clone, Default)]
pub struct StockImportReport {
    pub file_name: String,
    pub sheet_name: String,
    pub batch_token: String,
    pub dry_run: bool,

    pub parsed_rows: u32,
    pub skipped_rows: u32,

    pub created_series: u32,
    pub created_categories: u32,
    pub created_cities: u32,
    pub created_products: u32,
    pub updated_products: u32,
    pub created_offers: u32,
    pub updated_offers: u32,
    pub deactivated_offers: u32,

    pub errors: Vec<RowIssue>,
}

const MAX_DISPLAYED_ERRORS: usize = 50;

impl StockImportReport {
    pub fn new(file_name: String, sheet_name: String, batch_token: String, dry_run: bool) -> Self {
        StockImportReport {
            file_name,
            sheet_name,
            batch_token,
            dry_run,
            ..Default::default()
        }
    }

    pub fn add_error(&mut self, row: Option<u32>, message: impl Into<String>) {
        self.errors.push(RowIssue {
            row,
            message: message.into(),
        });
    }
}

impl std::fmt::Display for StockImportReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = if self.dry_run { "DRY-RUN" } else { "APPLIED" };
        writeln!(f, "[{}] {} / {}", tag, self.file_name, self.sheet_name)?;
        writeln!(
            f,
            "Rows: parsed={}, skipped={}, errors={}",
            self.parsed_rows,
            self.skipped_rows,
            self.errors.len()
        )?;
        writeln!(
            f,
            "Created: series={}, categories={}, cities={}, products={}, offers={}",
            self.created_series,
            self.created_categories,
            self.created_cities,
            self.created_products,
            self.created_offers
        )?;
        writeln!(
            f,
            "Updated: products={}, offers={}",
            self.updated_products, self.updated_offers
        )?;
        write!(f, "Deactivated offers: {}", self.deactivated_offers)?;
        for issue in self.errors.iter().take(MAX_DISPLAYED_ERRORS) {
            match issue.row {
                Some(row) => write!(f, "\n- row {}: {}", row, issue.message)?,
                None => write!(f, "\n- {}", issue.message)?,
            }
        }
        if self.errors.len() > MAX_DISPLAYED_ERRORS {
            write!(f, "\n... and {} more", self.errors.len() - MAX_DISPLAYED_ERRORS)?;
        }
        Ok(())
    }
}
