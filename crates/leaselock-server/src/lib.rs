//! Stock-deduction demo server.
//!
//! Every `/deduct_stock` request takes the `stock_key` lease before the
//! read-decrement-write on the stock counter, so any number of server
//! processes sharing one Redis never oversell.

pub mod api;
pub mod config;
pub mod logging;
pub mod startup;
pub mod stock;
