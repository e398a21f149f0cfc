use pilot_deck::AppError;

#[test]
fn display_prefixes_each_variant() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::NotFound("s1".into()), "not found: s1"),
        (AppError::Capacity("full".into()), "capacity: full"),
        (AppError::Resource("crashed".into()), "resource: crashed"),
        (AppError::Oracle("timeout".into()), "oracle: timeout"),
        (AppError::Delivery("late".into()), "delivery: late"),
        (AppError::Protocol("garbage".into()), "protocol: garbage"),
        (AppError::Streaming("gone".into()), "streaming: gone"),
        (AppError::Ipc("pipe".into()), "ipc: pipe"),
        (AppError::Http("502".into()), "http: 502"),
        (AppError::Io("disk".into()), "io: disk"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn converts_library_errors() {
    let io: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
    assert!(matches!(io, AppError::Io(_)));

    let json: AppError = serde_json::from_str::<serde_json::Value>("{")
        .expect_err("invalid json")
        .into();
    assert!(matches!(json, AppError::Protocol(_)));

    let toml: AppError = toml::from_str::<toml::Value>("= nope")
        .expect_err("invalid toml")
        .into();
    assert!(matches!(toml, AppError::Config(_)));
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error + Send + Sync + 'static>() {}
    assert_error::<AppError>();
}
