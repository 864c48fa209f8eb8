pub mod api;
pub mod core;

pub use crate::api::BasketballClassifier;

/// 初始化日志；重复调用无副作用
pub fn init_logging() {
    #[cfg(target_os = "android")]
    {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Debug)
                .with_tag("courtside_lib"),
        );
    }

    #[cfg(not(target_os = "android"))]
    {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_init_logging_twice() {
        super::init_logging();
        super::init_logging();
        log::info!("🏀 logging ready");
    }
}
