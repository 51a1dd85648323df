//! Binance module - Exchange implementation for Binance spot and USDⓈ-M futures

pub mod auth;
pub mod client;
pub mod messages;
pub mod rest;

pub use client::BinanceClient;
pub use rest::BinanceRestClient;
