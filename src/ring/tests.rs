#[cfg(test)]
mod tests {
    use crate::ring::{in_arc, Id, NodeRef, ID_BYTES};

    fn id(byte: u8) -> Id {
        let mut bytes = [0u8; ID_BYTES];
        bytes[ID_BYTES - 1] = byte;
        Id::from_bytes(bytes)
    }

    // ============================================================
    // DIGEST
    // ============================================================

    #[test]
    fn test_digest_known_vectors() {
        assert_eq!(
            Id::digest(b"").to_string(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(
            Id::digest(b"abc").to_string(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            Id::digest(b"hello").to_string(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }

    #[test]
    fn test_digest_is_deterministic() {
        let a = Id::digest(b"127.0.0.1:8001");
        let b = Id::digest(b"127.0.0.1:8001");
        assert_eq!(a, b);

        let c = Id::digest(b"127.0.0.1:8002");
        assert_ne!(a, c);
    }

    #[test]
    fn test_ordering_is_unsigned_big_endian() {
        let mut high = [0u8; ID_BYTES];
        high[0] = 0x80;
        let high = Id::from_bytes(high);

        let mut low = [0xFFu8; ID_BYTES];
        low[0] = 0x00;
        let low = Id::from_bytes(low);

        assert!(low < high);
        assert!(id(1) < id(2));
        assert_eq!(id(7), id(7));
    }

    // ============================================================
    // ADD_POW2
    // ============================================================

    #[test]
    fn test_add_pow2_sets_expected_bytes() {
        let zero = Id::ZERO;
        assert_eq!(zero.add_pow2(0).as_bytes()[19], 1);
        assert_eq!(zero.add_pow2(8).as_bytes()[18], 1);
        assert_eq!(zero.add_pow2(16).as_bytes()[17], 1);
        assert_eq!(zero.add_pow2(159).as_bytes()[0], 0x80);
    }

    #[test]
    fn test_add_pow2_carry_propagation() {
        let mut bytes = [0u8; ID_BYTES];
        bytes[19] = 0xFF;
        let sum = Id::from_bytes(bytes).add_pow2(0);
        assert_eq!(sum.as_bytes()[19], 0);
        assert_eq!(sum.as_bytes()[18], 1);
    }

    #[test]
    fn test_add_pow2_wraps_around_the_ring() {
        let all_ones = Id::from_bytes([0xFFu8; ID_BYTES]);
        let wrapped = all_ones.add_pow2(0);
        assert_eq!(wrapped, Id::ZERO);
    }

    #[test]
    fn test_add_pow2_out_of_range_is_identity() {
        let base = Id::digest(b"base");
        assert_eq!(base.add_pow2(160), base);
        assert_eq!(base.add_pow2(usize::MAX), base);
    }

    // ============================================================
    // ARC MEMBERSHIP
    // ============================================================

    #[test]
    fn test_arc_start_is_always_excluded() {
        assert!(!in_arc(&id(10), &id(10), &id(20), false));
        assert!(!in_arc(&id(10), &id(10), &id(20), true));
    }

    #[test]
    fn test_arc_end_inclusivity() {
        assert!(in_arc(&id(20), &id(10), &id(20), true));
        assert!(!in_arc(&id(20), &id(10), &id(20), false));
    }

    #[test]
    fn test_arc_simple_range_matches_interval() {
        for x in 0..=40u8 {
            let inside = x > 10 && x <= 30;
            assert_eq!(
                in_arc(&id(x), &id(10), &id(30), true),
                inside,
                "x = {}",
                x
            );
        }
    }

    #[test]
    fn test_arc_wraparound_range() {
        // Arc (200, 10] passes through zero.
        assert!(in_arc(&id(250), &id(200), &id(10), true));
        assert!(in_arc(&id(0), &id(200), &id(10), true));
        assert!(in_arc(&id(10), &id(200), &id(10), true));
        assert!(!in_arc(&id(100), &id(200), &id(10), true));
        assert!(!in_arc(&id(200), &id(200), &id(10), true));
    }

    #[test]
    fn test_arc_degenerate_contains_only_inclusive_endpoint() {
        assert!(in_arc(&id(5), &id(5), &id(5), true));
        assert!(!in_arc(&id(5), &id(5), &id(5), false));
        assert!(!in_arc(&id(6), &id(5), &id(5), true));
    }

    // ============================================================
    // NODE REFERENCES
    // ============================================================

    #[test]
    fn test_node_ref_identity_is_the_digest_of_the_endpoint() {
        let node = NodeRef::new("127.0.0.1", 19000);
        assert_eq!(node.id, Id::digest(b"127.0.0.1:19000"));
        assert_eq!(node.endpoint(), "127.0.0.1:19000");
    }

    #[test]
    fn test_node_ref_equality_is_by_identifier() {
        let a = NodeRef::new("127.0.0.1", 8001);
        let b = NodeRef::new("127.0.0.1", 8001);
        let c = NodeRef::new("127.0.0.1", 8002);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_node_ref_parse_round_trip() {
        let parsed = NodeRef::parse("10.0.0.5:9000").unwrap();
        assert_eq!(parsed, NodeRef::new("10.0.0.5", 9000));
        assert_eq!(parsed.address, "10.0.0.5");
        assert_eq!(parsed.port, 9000);
    }

    #[test]
    fn test_node_ref_parse_rejects_garbage() {
        assert!(NodeRef::parse("no-port-here").is_err());
        assert!(NodeRef::parse(":8000").is_err());
        assert!(NodeRef::parse("host:notaport").is_err());
        assert!(NodeRef::parse("host:99999").is_err());
    }
}
