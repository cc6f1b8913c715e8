//! Schema for the `order_service` logical schema (spec §6). All tables live
//! in one connection/string, per Open Question (a) — do not replicate the
//! source's per-file `declarative_base()` fragmentation.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    broker_order_id TEXT UNIQUE,
    user_id TEXT NOT NULL,
    trading_account_id INTEGER NOT NULL,
    strategy_id INTEGER,
    portfolio_id INTEGER,
    execution_id TEXT,
    position_id INTEGER,
    source TEXT NOT NULL DEFAULT 'manual',
    symbol TEXT NOT NULL,
    exchange TEXT NOT NULL,
    transaction_type TEXT NOT NULL,
    order_type TEXT NOT NULL,
    product_type TEXT NOT NULL,
    variety TEXT NOT NULL DEFAULT 'regular',
    quantity INTEGER NOT NULL,
    filled_quantity INTEGER NOT NULL DEFAULT 0,
    pending_quantity INTEGER NOT NULL,
    cancelled_quantity INTEGER NOT NULL DEFAULT 0,
    price TEXT,
    trigger_price TEXT,
    average_price TEXT,
    validity TEXT NOT NULL DEFAULT 'DAY',
    disclosed_quantity INTEGER,
    status TEXT NOT NULL,
    status_message TEXT,
    broker_tag TEXT,
    risk_check_passed INTEGER NOT NULL DEFAULT 0,
    idempotency_key TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    submitted_at TEXT,
    exchange_at TEXT,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_orders_account_status ON orders(trading_account_id, status);
CREATE INDEX IF NOT EXISTS idx_orders_account_created ON orders(trading_account_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_orders_execution ON orders(execution_id);
CREATE INDEX IF NOT EXISTS idx_orders_nonterminal_age
    ON orders(status, created_at) WHERE status IN ('PENDING','SUBMITTED','OPEN','TRIGGER_PENDING');

CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id INTEGER NOT NULL REFERENCES orders(id),
    broker_order_id TEXT,
    broker_trade_id TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL,
    trading_account_id INTEGER NOT NULL,
    strategy_id INTEGER,
    execution_id TEXT,
    portfolio_id INTEGER,
    symbol TEXT NOT NULL,
    exchange TEXT NOT NULL,
    transaction_type TEXT NOT NULL,
    product_type TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    price TEXT NOT NULL,
    trade_value TEXT NOT NULL,
    trade_time TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'manual'
);

CREATE INDEX IF NOT EXISTS idx_trades_order ON trades(order_id);
CREATE INDEX IF NOT EXISTS idx_trades_account_symbol ON trades(trading_account_id, symbol);

CREATE TABLE IF NOT EXISTS positions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trading_account_id INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    exchange TEXT NOT NULL,
    product_type TEXT NOT NULL,
    trading_day TEXT NOT NULL,
    net_quantity INTEGER NOT NULL DEFAULT 0,
    is_overnight INTEGER NOT NULL DEFAULT 0,
    buy_quantity INTEGER NOT NULL DEFAULT 0,
    buy_value TEXT NOT NULL DEFAULT '0',
    buy_price TEXT NOT NULL DEFAULT '0',
    sell_quantity INTEGER NOT NULL DEFAULT 0,
    sell_value TEXT NOT NULL DEFAULT '0',
    sell_price TEXT NOT NULL DEFAULT '0',
    realized_pnl TEXT NOT NULL DEFAULT '0',
    unrealized_pnl TEXT NOT NULL DEFAULT '0',
    total_pnl TEXT NOT NULL DEFAULT '0',
    brokerage TEXT NOT NULL DEFAULT '0',
    stt TEXT NOT NULL DEFAULT '0',
    exchange_charges TEXT NOT NULL DEFAULT '0',
    gst TEXT NOT NULL DEFAULT '0',
    sebi_charges TEXT NOT NULL DEFAULT '0',
    stamp_duty TEXT NOT NULL DEFAULT '0',
    total_charges TEXT NOT NULL DEFAULT '0',
    net_pnl TEXT NOT NULL DEFAULT '0',
    last_price TEXT,
    close_price TEXT,
    is_open INTEGER NOT NULL DEFAULT 1,
    instrument_token INTEGER,
    strategy_id INTEGER,
    execution_id TEXT,
    entry_execution_id TEXT,
    closed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(trading_account_id, symbol, exchange, product_type, trading_day)
);

CREATE INDEX IF NOT EXISTS idx_positions_open ON positions(trading_account_id) WHERE is_open = 1;
CREATE INDEX IF NOT EXISTS idx_positions_instrument ON positions(instrument_token) WHERE is_open = 1;
CREATE INDEX IF NOT EXISTS idx_positions_execution ON positions(execution_id);

CREATE TABLE IF NOT EXISTS position_transfers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    position_id INTEGER NOT NULL REFERENCES positions(id),
    from_execution_id TEXT,
    to_execution_id TEXT,
    quantity INTEGER NOT NULL,
    transferred_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS order_state_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id INTEGER NOT NULL REFERENCES orders(id),
    old_status TEXT,
    new_status TEXT NOT NULL,
    changed_by_user_id TEXT,
    changed_by_system TEXT,
    reason TEXT,
    broker_response TEXT,
    metadata TEXT,
    changed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_order_history_order ON order_state_history(order_id, changed_at);

CREATE TABLE IF NOT EXISTS capital_ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    portfolio_id INTEGER NOT NULL,
    transaction_type TEXT NOT NULL,
    status TEXT NOT NULL,
    amount TEXT NOT NULL,
    reference_order_id INTEGER,
    reason TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS gtt_orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    broker_gtt_id TEXT UNIQUE,
    trading_account_id INTEGER NOT NULL,
    gtt_type TEXT NOT NULL,
    symbol TEXT NOT NULL,
    exchange TEXT NOT NULL,
    trigger_prices TEXT NOT NULL,
    last_price TEXT NOT NULL,
    orders TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS order_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    order_id INTEGER,
    trading_account_id INTEGER,
    payload TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS portfolio_config (
    portfolio_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    total_capital TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS portfolio_allocations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    portfolio_id INTEGER NOT NULL,
    strategy_id INTEGER NOT NULL,
    allocated_capital TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS portfolio_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    portfolio_id INTEGER NOT NULL,
    snapshot_at TEXT NOT NULL,
    total_value TEXT NOT NULL,
    total_pnl TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS position_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    position_id INTEGER NOT NULL,
    snapshot_at TEXT NOT NULL,
    net_quantity INTEGER NOT NULL,
    last_price TEXT,
    unrealized_pnl TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS strategy_lifecycle_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy_id INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    metadata TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS strategy_pnl_metrics (
    strategy_id INTEGER NOT NULL,
    trading_day TEXT NOT NULL,
    day_pnl TEXT NOT NULL DEFAULT '0',
    cumulative_pnl TEXT NOT NULL DEFAULT '0',
    win_rate TEXT NOT NULL DEFAULT '0',
    max_drawdown TEXT NOT NULL DEFAULT '0',
    roi_percent TEXT NOT NULL DEFAULT '0',
    max_consecutive_losses INTEGER NOT NULL DEFAULT 0,
    trade_count INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (strategy_id, trading_day)
);

CREATE TABLE IF NOT EXISTS position_subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instrument_token INTEGER NOT NULL,
    trading_account_id INTEGER NOT NULL,
    source TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_subscribable INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    UNIQUE(instrument_token, trading_account_id, source)
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_active
    ON position_subscriptions(instrument_token) WHERE is_active = 1;

CREATE TABLE IF NOT EXISTS account_sync_tiers (
    trading_account_id INTEGER PRIMARY KEY,
    tier TEXT NOT NULL,
    hot_expires_at TEXT,
    last_activity_at TEXT,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_account_tiers_tier ON account_sync_tiers(tier);

CREATE TABLE IF NOT EXISTS sync_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_type TEXT NOT NULL,
    tier TEXT,
    checked INTEGER NOT NULL DEFAULT 0,
    drifted INTEGER NOT NULL DEFAULT 0,
    corrected INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    finished_at TEXT
);
"#;
