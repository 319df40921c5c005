fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use peerdrop_protocol::{Codec, ItemMeta, Role, SessionDescriptor, WireMessage};
    use peerdrop_reference_store::StoredReference;

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values. Object key order is not significant.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    // --- Data channel frames ---

    #[test]
    fn fixture_metadata() {
        let msg: WireMessage = roundtrip_test("metadata.json");
        let WireMessage::Metadata { items } = msg else {
            panic!("expected metadata, got {}", msg.kind());
        };
        assert_eq!(
            items,
            vec![
                ItemMeta {
                    name: "a.txt".into(),
                    size: 5,
                    mime_type: "text/plain".into(),
                },
                ItemMeta {
                    name: "empty.bin".into(),
                    size: 0,
                    mime_type: String::new(),
                },
            ]
        );
    }

    #[test]
    fn fixture_chunk() {
        let msg: WireMessage = roundtrip_test("chunk.json");
        assert_eq!(
            msg,
            WireMessage::Chunk {
                item_index: 0,
                offset: 16_384,
                bytes: b"hello".to_vec(),
            }
        );
    }

    #[test]
    fn fixture_complete() {
        let msg: WireMessage = roundtrip_test("complete.json");
        assert_eq!(msg, WireMessage::Complete);
    }

    #[test]
    fn frames_parse_from_raw_fixture_bytes() {
        for name in ["metadata.json", "chunk.json", "complete.json"] {
            let raw = read_fixture(name);
            WireMessage::from_frame(raw.as_bytes())
                .unwrap_or_else(|e| panic!("{name} is not a valid frame: {e}"));
        }
    }

    #[test]
    fn metadata_without_mime_type_defaults_to_empty() {
        let msg = WireMessage::from_frame(br#"{"type":"metadata","items":[{"name":"x","size":1}]}"#)
            .unwrap();
        let WireMessage::Metadata { items } = msg else {
            panic!("expected metadata");
        };
        assert_eq!(items[0].mime_type, "");
    }

    // --- Negotiation descriptors ---

    #[test]
    fn fixture_offer_descriptor() {
        let desc: SessionDescriptor = roundtrip_test("offer_descriptor.json");
        assert_eq!(desc.role(), Role::Offer);
        assert_eq!(desc.session_id(), "5f0c6e3a9d2b4c1e8a7f6b5d4c3b2a19");
        assert_eq!(desc.created_at().timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn fixture_answer_descriptor() {
        let offer: SessionDescriptor = roundtrip_test("offer_descriptor.json");
        let answer: SessionDescriptor = roundtrip_test("answer_descriptor.json");
        assert_eq!(answer.role(), Role::Answer);
        assert_eq!(answer.session_id(), offer.session_id());
    }

    #[test]
    fn offer_reference_matches_fixture() {
        let codec = Codec::default();
        let reference = read_fixture("offer_reference.txt");
        let expected: SessionDescriptor =
            serde_json::from_value(load_fixture("offer_descriptor.json")).unwrap();

        let decoded: SessionDescriptor = codec.decode(&reference).unwrap();
        assert_eq!(decoded, expected);
        assert_eq!(codec.encode(&expected).unwrap(), reference.trim());
    }

    // --- Reference store entries ---

    #[test]
    fn fixture_stored_reference() {
        let stored: StoredReference = roundtrip_test("stored_reference.json");
        assert_eq!(stored.stored_at.timestamp_millis(), 1_700_000_000_000);
    }
}
