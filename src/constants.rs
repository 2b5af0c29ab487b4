pub const SERVER_PORT: u16 = 3000;

pub const DEFAULT_SERVICE_NAME: &str = "dailyroll-api";
pub const DEFAULT_TRACER_NAME: &str = "dailyroll-tracer";
pub const DEFAULT_LOG_FILTER: &str =
    "dailyroll_server=debug,tower_http=debug,axum=debug,sqlx=info,info";

// GAME RULES
//
// The delta range is inclusive on both ends.
pub const COOLDOWN_HOURS: i64 = 24;
pub const DELTA_MIN: i64 = -10;
pub const DELTA_MAX: i64 = 10;
pub const LEADERBOARD_SIZE: usize = 10;
pub const LEADERBOARD_MAX: usize = 100;

// DAILY COOLDOWN CLEAR
pub const DEFAULT_RESET_TIMEZONE: &str = "Asia/Almaty";
pub const DEFAULT_RESET_AT: &str = "00:00";
