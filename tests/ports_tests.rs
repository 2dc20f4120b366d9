use lan_recon_rs::ports::{parse_port_range, PortRange};

#[test]
fn parse_range_and_single() {
    let r = parse_port_range("20-25").expect("parse ok");
    assert_eq!(r.iter().collect::<Vec<_>>(), vec![20, 21, 22, 23, 24, 25]);
    assert_eq!(r.len(), 6);

    let single = parse_port_range("8080").expect("parse ok");
    assert_eq!(single, PortRange::single(8080));
}

#[test]
fn invalid_ranges_rejected() {
    assert!(parse_port_range("1025-1024").is_err());
    assert!(parse_port_range("65536").is_err());
    assert!(parse_port_range("").is_err());
}

#[test]
fn contains_is_inclusive() {
    let r = PortRange::new(1, 100).unwrap();
    assert!(r.contains(1) && r.contains(100));
    assert!(!r.contains(0) && !r.contains(101));
}
