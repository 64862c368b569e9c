use trackq::config::Config;
use trackq::config::secrets::ExposeSecret;
use trackq::error::Error;
use trackq::publisher::PublisherOptions;

// Environment variables are process-wide, so every scenario runs in one test.
#[test]
fn config_from_env() {
    let vars = [
        "TRACKQ_API_KEY",
        "TRACKQ_CLIENT_ID",
        "TRACKQ_QUEUE_CAPACITY",
        "TRACKQ_CONSTRAINTS_FILE",
    ];
    unsafe {
        for var in vars {
            std::env::remove_var(var);
        }
    }

    // Missing required vars.
    let result = Config::from_env();
    assert!(matches!(result, Err(Error::Config(_))));

    // Required vars only: defaults apply.
    unsafe {
        std::env::set_var("TRACKQ_API_KEY", "key-123");
        std::env::set_var("TRACKQ_CLIENT_ID", "courier-7");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.api_key.expose_secret(), "key-123");
    assert_eq!(config.client_id, "courier-7");
    assert_eq!(config.queue_capacity, 100);
    assert!(config.constraints_file.is_none());
    assert!(!config.log_level.is_empty());
    assert!(!format!("{config:?}").contains("key-123"));

    // Explicit capacity.
    unsafe {
        std::env::set_var("TRACKQ_QUEUE_CAPACITY", "16");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.queue_capacity, 16);
    let options = PublisherOptions::from_config(&config).unwrap();
    assert_eq!(options.queue.capacity, 16);
    assert!(options.default_constraints.is_none());

    // Zero capacity is rejected.
    unsafe {
        std::env::set_var("TRACKQ_QUEUE_CAPACITY", "0");
    }
    assert!(matches!(Config::from_env(), Err(Error::Config(_))));

    // A constraints file feeds the publisher's defaults.
    let path = std::env::temp_dir().join(format!("trackq-constraints-{}.toml", std::process::id()));
    std::fs::write(
        &path,
        r#"
proximity_threshold = 50.0
battery_threshold = 10.0

[default_resolution]
accuracy = "high"
desired_interval_ms = 2000
minimum_displacement = 2.0
"#,
    )
    .unwrap();
    unsafe {
        std::env::remove_var("TRACKQ_QUEUE_CAPACITY");
        std::env::set_var("TRACKQ_CONSTRAINTS_FILE", &path);
    }
    let config = Config::from_env().unwrap();
    let options = PublisherOptions::from_config(&config).unwrap();
    let constraints = options.default_constraints.expect("constraints loaded");
    assert_eq!(constraints.low_battery_multiplier, 1.0);
    assert_eq!(options.default_resolution, constraints.default_resolution);

    std::fs::remove_file(&path).ok();
    unsafe {
        for var in vars {
            std::env::remove_var(var);
        }
    }
}
