//! Configuration file round trips and validation

use courier::config::CourierConfig;
use courier::usb::UsbOptions;
use courier::wifi::WifiOptions;
use std::net::Ipv4Addr;
use std::time::Duration;

#[test]
fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("courier.toml");

    let mut config = CourierConfig::default();
    config.general.log_level = "debug".to_string();
    config.wifi.advertise_interval_ms = 250;
    config.usb.marker_dir = "BloomBooks".to_string();
    config.save(&path).unwrap();

    let loaded = CourierConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.general.log_level, "debug");
    assert_eq!(loaded.wifi.advertise_interval(), Duration::from_millis(250));
    assert_eq!(loaded.usb.marker_dir, "BloomBooks");
}

#[test]
fn test_partial_file_uses_defaults() {
    let config = CourierConfig::from_toml(
        r#"
        [wifi]
        subnet_mask = "255.255.255.0"

        [usb]
        poll_interval_ms = 250
        "#,
    )
    .unwrap();

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.wifi.advertise_port, protocol::ADVERTISE_PORT);
    assert_eq!(config.wifi.broadcast_ip().unwrap(), None);
    assert_eq!(
        config.wifi.subnet_mask_ip().unwrap(),
        Some(Ipv4Addr::new(255, 255, 255, 0))
    );
    assert_eq!(config.usb.poll_interval(), Duration::from_millis(250));
}

#[test]
fn test_invalid_values_are_rejected() {
    let cases = [
        "[general]\nlog_level = \"loud\"",
        "[wifi]\nlisten_port = 0",
        "[wifi]\nlisten_port = 5913",
        "[wifi]\nbroadcast_addr = \"everyone\"",
        "[wifi]\nsubnet_mask = \"255.255.0\"",
        "[wifi]\nadvertise_interval_ms = 0",
        "[usb]\npoll_interval_ms = 0",
        "[usb]\ncopy_buffer_kib = 0",
        "[usb]\nmarker_dir = \"..\"",
        "[usb]\nmarker_dir = \"Bloom\\\\books\"",
    ];

    for case in cases {
        assert!(
            CourierConfig::from_toml(case).is_err(),
            "accepted invalid config: {}",
            case
        );
    }
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(CourierConfig::load(Some(dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_channel_options_from_config() {
    let mut config = CourierConfig::from_toml(
        r#"
        [wifi]
        advertise_port = 6000
        listen_port = 6001
        broadcast_addr = "192.168.1.255"
        advertise_interval_ms = 500

        [usb]
        marker_dir = "Books"
        copy_buffer_kib = 64

        [bundle]
        staging_dir = "/tmp/courier-staging"
        "#,
    )
    .unwrap();

    let wifi = WifiOptions::from_config(&config).unwrap();
    assert_eq!(wifi.listen_port, 6001);
    assert_eq!(wifi.advertiser.port, 6000);
    assert_eq!(wifi.advertiser.broadcast, Some(Ipv4Addr::new(192, 168, 1, 255)));
    assert_eq!(wifi.advertiser.subnet_mask, None);
    assert_eq!(wifi.advertiser.interval, Duration::from_millis(500));

    let usb = UsbOptions::from_config(&config);
    assert_eq!(usb.marker_dir, "Books");
    assert_eq!(usb.copy_buffer_bytes, 64 * 1024);
    assert_eq!(usb.staging_dir, std::path::PathBuf::from("/tmp/courier-staging"));

    config.wifi.broadcast_addr = Some("not an address".to_string());
    assert!(WifiOptions::from_config(&config).is_err());
}
