//! Read-only answers to chat commands

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::common::traits::SharedClock;
use crate::execution::{OrderManager, SharedPortfolio};
use crate::reporting::events::{pct, quote};
use crate::strategy::{SharedMonitor, TierState};

/// How many recent trades `/trades` lists
const RECENT_TRADES: usize = 5;

/// Supported commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Balance,
    Trades,
    Profits,
    Orders,
    Positions,
    Help,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Balance,
        Command::Trades,
        Command::Profits,
        Command::Orders,
        Command::Positions,
        Command::Help,
    ];

    /// Parse `/name`, `/name@bot` or `name`, ignoring trailing arguments
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let word = word.trim_start_matches('/');
        let name = word.split('@').next().unwrap_or(word).to_ascii_lowercase();
        match name.as_str() {
            "balance" => Some(Command::Balance),
            "trades" => Some(Command::Trades),
            "profits" => Some(Command::Profits),
            "orders" => Some(Command::Orders),
            "positions" => Some(Command::Positions),
            "help" | "start" => Some(Command::Help),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Balance => "balance",
            Command::Trades => "trades",
            Command::Profits => "profits",
            Command::Orders => "orders",
            Command::Positions => "positions",
            Command::Help => "help",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Command::Balance => "Current balance and reserve",
            Command::Trades => "Trade count and latest fills",
            Command::Profits => "Realized and unrealized P&L",
            Command::Orders => "Open orders and their expiry",
            Command::Positions => "Prices, drops and tier states",
            Command::Help => "List commands",
        }
    }
}

/// Builds command replies from the engine's shared state
#[derive(Clone)]
pub struct CommandHandler {
    portfolio: SharedPortfolio,
    orders: Arc<OrderManager>,
    monitors: Vec<SharedMonitor>,
    clock: SharedClock,
}

impl CommandHandler {
    pub fn new(
        portfolio: SharedPortfolio,
        orders: Arc<OrderManager>,
        monitors: Vec<SharedMonitor>,
        clock: SharedClock,
    ) -> Self {
        Self {
            portfolio,
            orders,
            monitors,
            clock,
        }
    }

    /// Reply to one inbound message
    pub async fn handle(&self, text: &str) -> String {
        match Command::parse(text) {
            Some(Command::Balance) => self.balance().await,
            Some(Command::Trades) => self.trades().await,
            Some(Command::Profits) => self.profits().await,
            Some(Command::Orders) => self.open_orders().await,
            Some(Command::Positions) => self.positions().await,
            Some(Command::Help) => Self::help(),
            None => format!("Unknown command: {}\n\n{}", text.trim(), Self::help()),
        }
    }

    async fn balance(&self) -> String {
        let portfolio = self.portfolio.read().await;
        let asset = portfolio.asset();
        let mut out = String::from("📊 Balance\n");
        let _ = writeln!(out, "Free: {} {}", quote(portfolio.free()), asset);
        let _ = writeln!(out, "Locked: {} {}", quote(portfolio.locked()), asset);
        let _ = writeln!(out, "Reserve: {} {}", quote(portfolio.reserve()), asset);
        let _ = write!(out, "Equity: {} {}", quote(portfolio.equity()), asset);
        out
    }

    async fn trades(&self) -> String {
        let portfolio = self.portfolio.read().await;
        let trades = portfolio.trades();
        let mut out = format!("Total number of trades: {}", trades.len());
        for trade in trades.iter().rev().take(RECENT_TRADES) {
            let _ = write!(
                out,
                "\n{} {} {} {} @ {}",
                trade.executed_at.format("%Y-%m-%d %H:%M"),
                trade.side,
                trade.quantity.normalize(),
                trade.symbol,
                trade.price.normalize()
            );
        }
        out
    }

    async fn last_prices(&self) -> BTreeMap<String, Decimal> {
        let mut prices = BTreeMap::new();
        for monitor in &self.monitors {
            let view = monitor.lock().await.view();
            if let Some(price) = view.last_price {
                prices.insert(view.symbol, price);
            }
        }
        prices
    }

    async fn profits(&self) -> String {
        let prices = self.last_prices().await;
        let portfolio = self.portfolio.read().await;
        let asset = portfolio.asset().to_string();

        let mut out = String::from("💹 Profits\n");
        let _ = writeln!(out, "Realized: {} {}", quote(portfolio.total_realized()), asset);
        let _ = writeln!(out, "Fees paid: {} {}", quote(portfolio.total_fees()), asset);

        let mut unrealized_total = Decimal::ZERO;
        for (symbol, holding) in portfolio.holdings() {
            let (Some(avg), Some(price)) = (holding.average_price(), prices.get(symbol)) else {
                continue;
            };
            let unrealized = (*price - avg) * holding.quantity;
            unrealized_total += unrealized;
            let _ = writeln!(
                out,
                "{}: {} {} ({})",
                symbol,
                quote(unrealized),
                asset,
                pct((*price - avg) / avg)
            );
        }
        let _ = write!(out, "Unrealized: {} {}", quote(unrealized_total), asset);
        out
    }

    async fn open_orders(&self) -> String {
        let open = self.orders.open_orders().await;
        if open.is_empty() {
            return "No open orders".to_string();
        }

        let now = self.clock.now();
        let mut out = format!("📋 Open orders ({})", open.len());
        for record in &open {
            let _ = write!(
                out,
                "\n{} {} {} {} ({})",
                record.symbol,
                record.role,
                record.filled_qty.normalize(),
                record.quantity.normalize(),
                record.state
            );
            if let Some(price) = record.price.or(record.stop_price) {
                let _ = write!(out, " @ {}", price.normalize());
            }
            if let Some(expires_at) = record.expires_at {
                let left = expires_at - now;
                let _ = write!(
                    out,
                    ", expires {} (in {}h{:02}m)",
                    expires_at.format("%Y-%m-%d %H:%M"),
                    left.num_hours().max(0),
                    (left.num_minutes() % 60).max(0)
                );
            }
            if record.needs_recheck {
                let _ = write!(out, " [status unknown]");
            }
        }
        out
    }

    async fn positions(&self) -> String {
        let portfolio_holdings = self.portfolio.read().await.holdings().clone();
        let mut out = String::from("📈 Positions");

        for monitor in &self.monitors {
            let view = monitor.lock().await.view();
            let _ = write!(out, "\n\n{}", view.symbol);
            match view.last_price {
                Some(price) => {
                    let _ = write!(out, ": {}", price.normalize());
                }
                None => {
                    let _ = write!(out, ": no price yet");
                }
            }
            if let Some(holding) = portfolio_holdings.get(&view.symbol) {
                let _ = write!(out, "\nHolding: {}", holding.quantity.normalize());
                if let Some(avg) = holding.average_price() {
                    let _ = write!(out, " @ {}", avg.round_dp(8).normalize());
                }
            }
            for kind in &view.kinds {
                let tiers: Vec<String> = kind
                    .tiers
                    .iter()
                    .map(|tier| {
                        let mark = match tier.state {
                            TierState::Armed => "○",
                            TierState::Fired => "●",
                        };
                        format!("{}{}", mark, pct(tier.threshold))
                    })
                    .collect();
                let _ = write!(
                    out,
                    "\n{} drop {} [{}]",
                    kind.kind,
                    pct(kind.drop),
                    tiers.join(" ")
                );
            }
        }
        out
    }

    pub fn help() -> String {
        let mut out = String::from("Available commands:");
        for command in Command::ALL {
            let _ = write!(out, "\n/{} - {}", command.name(), command.description());
        }
        out
    }
}
