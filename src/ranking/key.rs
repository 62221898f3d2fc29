use itertools::Itertools;
use std::fmt;
use strum::{EnumIter, IntoEnumIterator};

pub const MODES: [&'static str; 2] = ["backtest", "paper"];
pub const METRICS: [&'static str; 4] = ["total_pnl", "sharpe_ratio", "win_rate", "total_trades"];
pub const PERIODS: [&'static str; 4] = ["7d", "30d", "90d", "all"];

/// Execution environment the scores were produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum Mode {
    Backtest,
    Paper,
}

/// Performance measure the ranking is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum Metric {
    TotalPnl,
    SharpeRatio,
    WinRate,
    TotalTrades,
}

/// Lookback window the scores are aggregated over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum Period {
    Days7,
    Days30,
    Days90,
    All,
}

impl Mode {
    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            mode if mode == MODES[0] => Some(Mode::Backtest),
            mode if mode == MODES[1] => Some(Mode::Paper),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mode::Backtest => write!(f, "{}", MODES[0]),
            Mode::Paper => write!(f, "{}", MODES[1]),
        }
    }
}

impl Metric {
    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            metric if metric == METRICS[0] => Some(Metric::TotalPnl),
            metric if metric == METRICS[1] => Some(Metric::SharpeRatio),
            metric if metric == METRICS[2] => Some(Metric::WinRate),
            metric if metric == METRICS[3] => Some(Metric::TotalTrades),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Metric::TotalPnl => write!(f, "{}", METRICS[0]),
            Metric::SharpeRatio => write!(f, "{}", METRICS[1]),
            Metric::WinRate => write!(f, "{}", METRICS[2]),
            Metric::TotalTrades => write!(f, "{}", METRICS[3]),
        }
    }
}

impl Period {
    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            period if period == PERIODS[0] => Some(Period::Days7),
            period if period == PERIODS[1] => Some(Period::Days30),
            period if period == PERIODS[2] => Some(Period::Days90),
            period if period == PERIODS[3] => Some(Period::All),
            _ => None,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Period::Days7 => write!(f, "{}", PERIODS[0]),
            Period::Days30 => write!(f, "{}", PERIODS[1]),
            Period::Days90 => write!(f, "{}", PERIODS[2]),
            Period::All => write!(f, "{}", PERIODS[3]),
        }
    }
}

/// Identifier of one distinct ranking view. Equal tuples address the same
/// cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaderboardKey {
    pub mode: Mode,
    pub metric: Metric,
    pub period: Period,
}

impl LeaderboardKey {
    pub fn new(mode: Mode, metric: Metric, period: Period) -> LeaderboardKey {
        LeaderboardKey {
            mode,
            metric,
            period,
        }
    }

    /// Every (mode, metric, period) combination, used by the warm-up and
    /// periodic refresh jobs.
    pub fn all() -> impl Iterator<Item = LeaderboardKey> {
        Mode::iter()
            .cartesian_product(Metric::iter())
            .cartesian_product(Period::iter())
            .map(|((mode, metric), period)| LeaderboardKey::new(mode, metric, period))
    }

    /// Parse a "mode/metric/period" path segment triple.
    pub fn from_string(s: &str) -> Option<LeaderboardKey> {
        let mut parts = s.split('/');
        let mode = Mode::from_string(parts.next()?)?;
        let metric = Metric::from_string(parts.next()?)?;
        let period = Period::from_string(parts.next()?)?;
        match parts.next() {
            Some(_) => None,
            None => Some(LeaderboardKey::new(mode, metric, period)),
        }
    }
}

impl fmt::Display for LeaderboardKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}/{}", self.mode, self.metric, self.period)
    }
}
