use super::*;

#[test]
fn rejects_non_websocket_urls() {
    assert!(ClientConfig::new("ws://127.0.0.1:16621").is_ok());
    assert!(ClientConfig::new("wss://controller.local/ws").is_ok());
    assert!(matches!(
        ClientConfig::new("http://127.0.0.1:16621"),
        Err(ConfigError::InvalidUrl { .. })
    ));
    assert!(matches!(
        ClientConfig::new("not a url"),
        Err(ConfigError::InvalidUrl { .. })
    ));
}

#[test]
fn network_backoff_climbs_one_unit_at_a_time_to_ceiling() {
    let unit = Duration::from_millis(10);
    let mut backoff = Backoff::new(ClientConfig::default().with_reconnect_unit(unit).reconnect_policy());

    let delays: Vec<Duration> = (0..7).map(|_| backoff.next_network_delay()).collect();
    assert_eq!(
        delays,
        vec![unit, unit * 2, unit * 3, unit * 4, unit * 5, unit * 5, unit * 5]
    );

    backoff.reset();
    assert_eq!(backoff.next_network_delay(), unit);
}

#[test]
fn internal_failures_use_fixed_delay() {
    let mut backoff = Backoff::new(ClientConfig::default().reconnect_policy());
    backoff.next_network_delay();
    backoff.next_network_delay();
    assert_eq!(backoff.internal_failure_delay(), Duration::from_secs(5));
}
