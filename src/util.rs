use tracing::level_filters::LevelFilter;

const CONFIG_PATH: &str = "PROXY_SCHEDULER_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "./proxy-scheduler.json";

pub fn get_config_path() -> String {
    std::env::var(CONFIG_PATH).unwrap_or_else(|_| String::from(DEFAULT_CONFIG_PATH))
}

const LOG_LEVEL: &str = "PROXY_SCHEDULER_LOG";

const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::TRACE;

pub fn get_log_level() -> LevelFilter {
    let level_from_env = std::env::var(LOG_LEVEL);
    level_from_env.map_or(DEFAULT_LOG_LEVEL, |res| {
        res.parse().unwrap_or(DEFAULT_LOG_LEVEL)
    })
}
