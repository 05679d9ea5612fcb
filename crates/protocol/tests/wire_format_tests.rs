//! Wire format tests
//!
//! Pins the JSON produced for advertisements and accepted for book requests
//! against what Bloom Reader sends and expects.
//!
//! Run with: `cargo test -p protocol --test wire_format_tests`

use protocol::{
    ACK_PORT, ADVERTISE_PORT, Advertisement, BookRequest, CURRENT_VERSION, PROTOCOL_VERSION,
    ProtocolError, ProtocolVersion, READER_HTTP_PORT, decode_advertisement, decode_book_request,
    encode_advertisement, encode_book_request,
};

fn sample_advertisement() -> Advertisement {
    Advertisement {
        title: "Kuku na Mayai".to_string(),
        version: "9f3c22e1".to_string(),
        language: "sw".to_string(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        sender: "FIELD-LAPTOP".to_string(),
        sender_ip: Some("192.168.0.12".to_string()),
    }
}

mod ports {
    use super::*;

    #[test]
    fn test_ports_are_distinct() {
        assert_ne!(ADVERTISE_PORT, ACK_PORT);
        assert_ne!(ADVERTISE_PORT, READER_HTTP_PORT);
        assert_ne!(ACK_PORT, READER_HTTP_PORT);
    }
}

mod advertisement {
    use super::*;

    #[test]
    fn test_encoded_advertisement_is_utf8_json_object() {
        let bytes = encode_advertisement(&sample_advertisement()).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        let value: serde_json::Value = serde_json::from_str(text).unwrap();

        assert_eq!(value["title"], "Kuku na Mayai");
        assert_eq!(value["version"], "9f3c22e1");
        assert_eq!(value["language"], "sw");
        assert_eq!(value["protocolVersion"], "2.0");
        assert_eq!(value["sender"], "FIELD-LAPTOP");
        assert_eq!(value["senderIP"], "192.168.0.12");
    }

    #[test]
    fn test_non_ascii_title_survives() {
        let mut advert = sample_advertisement();
        advert.title = "Ñandú y el cóndor".to_string();

        let bytes = encode_advertisement(&advert).unwrap();
        let decoded = decode_advertisement(&bytes).unwrap();
        assert_eq!(decoded.title, "Ñandú y el cóndor");
    }

    #[test]
    fn test_decode_advertisement_from_reader_fixture() {
        let raw = br#"{"title":"T","version":"v","language":"en","protocolVersion":"2.0","sender":"S"}"#;
        let advert = decode_advertisement(raw).unwrap();

        assert_eq!(advert.sender_ip, None);
        let version = ProtocolVersion::parse(&advert.protocol_version).unwrap();
        assert!(version.is_compatible_with(&CURRENT_VERSION));
    }

    #[test]
    fn test_newer_minor_version_is_accepted() {
        let raw = br#"{"title":"T","version":"v","language":"en","protocolVersion":"2.3","sender":"S"}"#;
        assert_eq!(decode_advertisement(raw).unwrap().protocol_version, "2.3");
    }

    #[test]
    fn test_other_major_version_is_rejected() {
        let raw = br#"{"title":"T","version":"v","language":"en","protocolVersion":"3.0","sender":"S"}"#;
        match decode_advertisement(raw).unwrap_err() {
            ProtocolError::IncompatibleVersion { found, expected } => {
                assert_eq!(found, "3.0");
                assert_eq!(expected, PROTOCOL_VERSION);
            }
            other => panic!("unexpected error: {other}"),
        }

        let raw = br#"{"title":"T","version":"v","language":"en","protocolVersion":"1.9","sender":"S"}"#;
        assert!(matches!(
            decode_advertisement(raw),
            Err(ProtocolError::IncompatibleVersion { .. })
        ));
    }

    #[test]
    fn test_unparseable_version_is_rejected() {
        let raw = br#"{"title":"T","version":"v","language":"en","protocolVersion":"two","sender":"S"}"#;
        assert!(matches!(
            decode_advertisement(raw),
            Err(ProtocolError::InvalidVersion(_))
        ));
    }
}

mod book_request {
    use super::*;

    #[test]
    fn test_decode_reader_request() {
        let raw = br#"{"deviceAddress":"192.168.0.31","deviceName":"Galaxy Tab A"}"#;
        let request = decode_book_request(raw).unwrap();

        assert_eq!(
            request,
            BookRequest {
                device_address: "192.168.0.31".to_string(),
                device_name: "Galaxy Tab A".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let raw = br#"{"deviceAddress":"10.1.1.2","deviceName":"x","appVersion":"3.1"}"#;
        assert!(decode_book_request(raw).is_ok());
    }

    #[test]
    fn test_missing_address_is_rejected() {
        let err = decode_book_request(br#"{"deviceName":"x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));
    }

    #[test]
    fn test_not_json_is_rejected() {
        let err = decode_book_request(b"GIVE ME BOOK").unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));
    }

    #[test]
    fn test_encode_matches_reader_field_names() {
        let bytes = encode_book_request(&BookRequest {
            device_address: "10.0.0.5".to_string(),
            device_name: "Phone".to_string(),
        })
        .unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();

        assert!(text.contains("\"deviceAddress\":\"10.0.0.5\""));
        assert!(text.contains("\"deviceName\":\"Phone\""));
    }
}
