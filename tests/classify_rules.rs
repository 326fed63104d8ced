// tests/classify_rules.rs
//
// Classification contract: reject reasons, their order, and the literal
// magnitude polarity.

use deprem_relay::classify::{classify, RejectReason};
use deprem_relay::config::FilterConfig;
use deprem_relay::feed::envelope::EarthquakeCandidate;

fn marmara_candidate() -> EarthquakeCandidate {
    EarthquakeCandidate {
        magnitude: Some(0.3),
        latitude: Some(40.9),
        longitude: Some(29.1),
        region: Some("TURKEY (MARMARA)".to_string()),
        authority: Some("AFAD".to_string()),
        source_id: Some("s1".to_string()),
        time: Some("2024-11-18T21:30:15.0Z".to_string()),
        depth: Some(8.5),
    }
}

#[test]
fn every_missing_required_field_is_invalid_data() {
    let strips: Vec<fn(&mut EarthquakeCandidate)> = vec![
        |c| c.magnitude = None,
        |c| c.latitude = None,
        |c| c.longitude = None,
        |c| c.region = None,
        |c| c.authority = None,
        |c| c.source_id = None,
    ];
    for strip in strips {
        let mut c = marmara_candidate();
        strip(&mut c);
        assert_eq!(
            classify(&c, &FilterConfig::default()),
            Err(RejectReason::InvalidData)
        );
    }
}

#[test]
fn non_finite_numbers_are_invalid_data() {
    for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let mut c = marmara_candidate();
        c.magnitude = Some(bad);
        assert_eq!(
            classify(&c, &FilterConfig::default()),
            Err(RejectReason::InvalidData)
        );
    }
}

#[test]
fn region_without_the_token_is_out_of_region() {
    let mut c = marmara_candidate();
    c.region = Some("CENTRAL ITALY".to_string());
    assert_eq!(
        classify(&c, &FilterConfig::default()),
        Err(RejectReason::OutOfRegion)
    );
}

#[test]
fn region_token_matches_case_insensitively() {
    for region in ["Turkey", "WESTERN TURKEY", "turkey (aegean sea)"] {
        let mut c = marmara_candidate();
        c.region = Some(region.to_string());
        assert!(classify(&c, &FilterConfig::default()).is_ok(), "{region}");
    }
}

#[test]
fn wrong_authority_is_untrusted() {
    let mut c = marmara_candidate();
    c.authority = Some("EMSC".to_string());
    assert_eq!(
        classify(&c, &FilterConfig::default()),
        Err(RejectReason::UntrustedAuthority)
    );
}

#[test]
fn reference_magnitude_polarity_rejects_the_four_point_five() {
    // The documented intent would keep a 4.5; the implemented check keeps
    // only quakes at or below the threshold. The 4.5 must be rejected by the
    // magnitude filter, not broadcast.
    let mut c = marmara_candidate();
    c.magnitude = Some(4.5);
    assert_eq!(
        classify(&c, &FilterConfig::default()),
        Err(RejectReason::MagnitudeFilter)
    );
}

#[test]
fn threshold_is_inclusive() {
    let cfg = FilterConfig::default();
    let mut c = marmara_candidate();
    c.magnitude = Some(cfg.magnitude_threshold);
    assert!(classify(&c, &cfg).is_ok());

    c.magnitude = Some(cfg.magnitude_threshold + 0.01);
    assert_eq!(classify(&c, &cfg), Err(RejectReason::MagnitudeFilter));
}

#[test]
fn checks_short_circuit_in_documented_order() {
    // Region is checked before authority, authority before magnitude.
    let cfg = FilterConfig::default();

    let mut c = marmara_candidate();
    c.region = Some("JAPAN".to_string());
    c.authority = Some("JMA".to_string());
    c.magnitude = Some(9.0);
    assert_eq!(classify(&c, &cfg), Err(RejectReason::OutOfRegion));

    let mut c = marmara_candidate();
    c.authority = Some("KOERI".to_string());
    c.magnitude = Some(9.0);
    assert_eq!(classify(&c, &cfg), Err(RejectReason::UntrustedAuthority));
}

#[test]
fn custom_filter_config_is_honored() {
    let cfg = FilterConfig {
        region_token: "greece".to_string(),
        trusted_authority: "NOA".to_string(),
        magnitude_threshold: 3.0,
    };
    let mut c = marmara_candidate();
    c.region = Some("SOUTHERN GREECE".to_string());
    c.authority = Some("NOA".to_string());
    c.magnitude = Some(2.9);
    assert!(classify(&c, &cfg).is_ok());
}
