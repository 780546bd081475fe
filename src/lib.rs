#![deny(clippy::unwrap_used)]

pub mod aggregate;
pub mod import;
pub mod normalize;
pub mod parse;
pub mod report;
pub mod store;
pub mod workbook;

pub use import::{import_stock, import_stock_from_reader, ImportOptions};
pub use report::{RowIssue, StockImportReport};
