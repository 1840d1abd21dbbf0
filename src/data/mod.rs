mod calculator;
mod loader;
mod panel;
mod stock_data;

pub use calculator::{AlphaCalculator, StockDataCalculator};
pub use loader::{CsvDataSource, StockDataSource};
pub use panel::{mean_daily_pearson, Panel};
pub use stock_data::{StockData, MAX_BACKTRACK_DAYS, MAX_FUTURE_DAYS};
