pub mod core;
pub mod payload;
pub mod workbook;
