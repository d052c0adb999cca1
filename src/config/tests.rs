use super::*;

#[test]
fn defaults_are_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.session.max_keep_alive, 600);
    assert_eq!(config.limits.max_queued_qos1, 1024);
}

#[test]
fn parses_minimal_toml() {
    let config = Config::from_toml(
        r#"
        [server]
        listeners = ["127.0.0.1:2883"]

        [limits]
        max_packet_size = 65536
        "#,
    )
    .unwrap();

    assert_eq!(config.server.listeners.len(), 1);
    assert_eq!(config.server.listeners[0].port(), 2883);
    assert_eq!(config.limits.max_packet_size, 65536);
    // Unspecified sections keep defaults
    assert_eq!(config.session.max_keep_alive, 600);
}

#[test]
fn rejects_oversized_keep_alive_cap() {
    let result = Config::from_toml(
        r#"
        [session]
        max_keep_alive = 700
        "#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn rejects_tls_listeners_without_material() {
    let result = Config::from_toml(
        r#"
        [server]
        tls_listeners = ["0.0.0.0:8883"]
        "#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn tls_table_resolves_into_settings() {
    let config = Config::from_toml(
        r#"
        [server]
        tls_listeners = ["0.0.0.0:8883"]

        [server.tls]
        cert = "/etc/embermq/cert.pem"
        key = "/etc/embermq/key.pem"
        trust_store = "/etc/embermq/clients.pem"
        require_client_cert = true
        "#,
    )
    .unwrap();

    let broker = config.broker_config();
    let tls = broker.tls.expect("tls settings present");
    assert_eq!(tls.cert_path, "/etc/embermq/cert.pem");
    assert_eq!(tls.trust_store_path.as_deref(), Some("/etc/embermq/clients.pem"));
    assert!(tls.require_client_cert);
}

#[test]
fn env_substitution_with_default() {
    let config = Config::from_toml(
        r#"
        [log]
        level = "${EMBERMQ_TEST_UNSET_LEVEL:-debug}"
        "#,
    )
    .unwrap();
    assert_eq!(config.log.level, "debug");
}

#[test]
fn broker_config_carries_limits() {
    let config = Config::from_toml(
        r#"
        [limits]
        max_inflight = 8
        max_queued_qos1 = 64
        max_write_buffer = 1000000

        [session]
        expiry_cap = 3600
        "#,
    )
    .unwrap();

    let broker = config.broker_config();
    assert_eq!(broker.max_inflight, 8);
    assert_eq!(broker.max_queued_messages, 64);
    assert_eq!(broker.max_write_buffer, 1_000_000);
    assert_eq!(broker.session_expiry_cap, 3600);
}
