//! Display format of relay errors.

use stream_relay::AppError;

#[test]
fn each_variant_has_distinct_prefix() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Transport("x".into()), "transport: x"),
        (AppError::SessionClosed("x".into()), "session closed: x"),
        (AppError::FinalizationTimeout("x".into()), "finalization timeout: x"),
        (AppError::Serialization("x".into()), "serialization: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn io_error_converts() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg == "pipe"));
}

#[test]
fn json_error_converts_to_serialization() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").expect_err("bad json");
    let err: AppError = json_err.into();
    assert!(err.to_string().starts_with("serialization:"));
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    assert_error(&AppError::Transport("down".into()));
}
