//! Database schema definitions

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Whale activity events (append-only)
CREATE TABLE IF NOT EXISTS whales (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    price REAL NOT NULL,
    volume REAL NOT NULL,
    change_percent REAL NOT NULL,
    side TEXT NOT NULL,
    confidence REAL NOT NULL,
    pattern TEXT,
    timestamp INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

-- Pump/dump events; validation columns are filled once, later
CREATE TABLE IF NOT EXISTS pump_dumps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    kind TEXT NOT NULL,
    price_before REAL NOT NULL,
    price_after REAL NOT NULL,
    change_percent REAL NOT NULL,
    volume REAL NOT NULL,
    is_valid INTEGER,
    validation_price REAL,
    score INTEGER,
    timestamp INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

-- Trade signals; stage results stored as a JSON array of three slots
CREATE TABLE IF NOT EXISTS signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    direction TEXT NOT NULL,
    entry_price REAL NOT NULL,
    source TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    score INTEGER NOT NULL DEFAULT 0,
    stages TEXT NOT NULL DEFAULT '[null,null,null]',
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    resolved_at INTEGER
);

-- Executed trades, open until stop or target closes them
CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_id INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    direction TEXT NOT NULL,
    entry_price REAL NOT NULL,
    amount REAL NOT NULL,
    leverage INTEGER NOT NULL,
    stop_loss REAL NOT NULL,
    take_profit REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    exit_price REAL,
    close_reason TEXT,
    pnl REAL,
    pnl_percent REAL,
    commission REAL NOT NULL DEFAULT 0,
    net_pnl REAL,
    opened_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    closed_at INTEGER
);

-- Per-cycle market snapshots
CREATE TABLE IF NOT EXISTS ohlcv (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    price REAL NOT NULL,
    high_24h REAL NOT NULL,
    low_24h REAL NOT NULL,
    volume REAL NOT NULL,
    change_24h REAL NOT NULL,
    timestamp INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

-- Indicator snapshots captured alongside whale events
CREATE TABLE IF NOT EXISTS indicators (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    rsi REAL,
    macd_line REAL,
    signal_line REAL,
    histogram REAL,
    ema_20 REAL,
    volume_avg REAL,
    timestamp INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_whales_symbol ON whales(symbol);
CREATE INDEX IF NOT EXISTS idx_pump_symbol_ts ON pump_dumps(symbol, timestamp);
CREATE INDEX IF NOT EXISTS idx_signals_symbol ON signals(symbol);
CREATE INDEX IF NOT EXISTS idx_signals_status ON signals(status);
CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status);
CREATE INDEX IF NOT EXISTS idx_ohlcv_symbol_ts ON ohlcv(symbol, timestamp)
"#;

/// ALTER TABLE migrations for columns added after first release.
/// Each runs on every startup; duplicate-column errors are tolerated.
pub const MIGRATIONS: &[&str] = &[];
