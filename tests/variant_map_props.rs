//! Property tests for the VariantMap codec.

use kdbxkit::errors::ErrorKind;
use kdbxkit::kdbx::variant_map::{Variant, VariantMap};
use proptest::prelude::*;

fn arb_variant() -> impl Strategy<Value = Variant> {
    prop_oneof![
        any::<bool>().prop_map(Variant::Bool),
        any::<i32>().prop_map(Variant::Int32),
        any::<u32>().prop_map(Variant::UInt32),
        any::<i64>().prop_map(Variant::Int64),
        any::<u64>().prop_map(Variant::UInt64),
        ".{0,24}".prop_map(Variant::String),
        prop::collection::vec(any::<u8>(), 0..48).prop_map(Variant::ByteArray),
    ]
}

fn arb_map() -> impl Strategy<Value = VariantMap> {
    prop::collection::vec(("[A-Za-z$]{1,12}", arb_variant()), 0..8).prop_map(|pairs| {
        let mut map = VariantMap::new();
        for (name, value) in pairs {
            map.insert(name, value);
        }
        map
    })
}

proptest! {
    #[test]
    fn encode_then_decode_is_identity(map in arb_map()) {
        let bytes = map.encode().unwrap();
        prop_assert_eq!(VariantMap::decode(&bytes).unwrap(), map);
    }

    #[test]
    fn every_strict_prefix_is_a_format_error(map in arb_map(), cut in any::<prop::sample::Index>()) {
        let bytes = map.encode().unwrap();
        let len = cut.index(bytes.len());
        let err = VariantMap::decode(&bytes[..len]).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = VariantMap::decode(&data);
    }
}
