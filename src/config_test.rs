use super::*;

fn config(base_url: &str, ws_mode: WsMode) -> ClientConfig {
    ClientConfig {
        base_url: base_url.to_owned(),
        ws_mode,
        ..ClientConfig::default()
    }
}

#[test]
fn proxied_ws_url_keeps_host_and_port() {
    let cfg = config("http://localhost:5173", WsMode::Proxied);
    assert_eq!(cfg.ws_url().expect("ws url"), "ws://localhost:5173/ws/");
}

#[test]
fn https_base_maps_to_wss() {
    let cfg = config("https://board.example.com/", WsMode::Proxied);
    assert_eq!(cfg.ws_url().expect("ws url"), "wss://board.example.com/ws/");
}

#[test]
fn port_offset_adds_to_http_port() {
    let cfg = config("http://127.0.0.1:20202", WsMode::PortOffset(1));
    assert_eq!(cfg.ws_url().expect("ws url"), "ws://127.0.0.1:20203");
}

#[test]
fn port_offset_uses_default_port_when_missing() {
    let cfg = config("http://example.com", WsMode::PortOffset(1));
    assert_eq!(cfg.ws_url().expect("ws url"), "ws://example.com:81");
}

#[test]
fn ws_url_rejects_non_http_base() {
    let cfg = config("ftp://example.com", WsMode::Proxied);
    assert!(matches!(cfg.ws_url(), Err(ConfigError::InvalidBaseUrl(_))));
}

#[test]
fn api_base_joins_root_without_double_slash() {
    let cfg = ClientConfig {
        base_url: "http://localhost:8000/".to_owned(),
        api_root: "/api/".to_owned(),
        ..ClientConfig::default()
    };
    assert_eq!(cfg.api_base(), "http://localhost:8000/api");
}

#[test]
fn ws_mode_parsing_defaults_to_proxied() {
    assert_eq!(parse_ws_mode(None, 1), WsMode::Proxied);
    assert_eq!(parse_ws_mode(Some("bogus"), 1), WsMode::Proxied);
    assert_eq!(parse_ws_mode(Some("port-offset"), 2), WsMode::PortOffset(2));
}

#[test]
fn default_flush_delay_is_200ms() {
    assert_eq!(ClientConfig::default().flush_delay, Duration::from_millis(200));
}
