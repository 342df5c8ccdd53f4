//! End-to-end round trips through `codec::serialize`/`codec::deserialize`
//! via the crate's public API, matching the scenarios seeded by `spec.md`
//! §8.

use karabo_bridge::codec::{deserialize, serialize, EncodeOptions, ProtocolVersion};
use karabo_bridge::transport::Frame;
use karabo_bridge::{DType, MetaBag, NdArray, PropertyBag, Train, Value};

fn to_frames(bufs: Vec<Vec<u8>>) -> Vec<Frame> {
    bufs.into_iter().map(Frame::from_owned).collect()
}

#[test]
fn array_and_scalars_together_v2_2() {
    let mut props = PropertyBag::new();
    props.insert("image.cellId".into(), Value::Int(7));
    let arr = NdArray::new(
        DType::Float32,
        vec![2, 2],
        Frame::from_owned(vec![0u8; 2 * 2 * 4]),
    )
    .unwrap();
    props.insert("image.data".into(), Value::Array(arr.clone()));

    let mut meta = MetaBag::default();
    meta.timestamp_tid = Some(10_000_000_000);

    let mut train = Train::new();
    train.insert_source("SPB_DET_AGIPD1M-1/DET/0CH0:xtdf", props.clone(), meta.clone());

    for version in [ProtocolVersion::V2_1, ProtocolVersion::V2_2] {
        let opts = EncodeOptions {
            version,
            dummy_timestamps: false,
        };
        let wire = serialize(&train, opts).unwrap();
        let decoded = deserialize(to_frames(wire)).unwrap();

        let decoded_props = &decoded.data["SPB_DET_AGIPD1M-1/DET/0CH0:xtdf"];
        assert_eq!(decoded_props["image.cellId"], Value::Int(7));
        assert_eq!(decoded_props["image.data"].as_array().unwrap(), &arr);
        assert_eq!(decoded.meta["SPB_DET_AGIPD1M-1/DET/0CH0:xtdf"], meta);
    }
}

#[test]
fn source_absent_from_meta_gets_empty_bag() {
    let mut train = Train::new();
    train.insert_source("only_data", PropertyBag::new(), MetaBag::default());

    let opts = EncodeOptions {
        version: ProtocolVersion::V2_2,
        dummy_timestamps: false,
    };
    let wire = serialize(&train, opts).unwrap();
    let decoded = deserialize(to_frames(wire)).unwrap();

    assert_eq!(decoded.data.keys().collect::<Vec<_>>(), decoded.meta.keys().collect::<Vec<_>>());
    assert!(decoded.meta["only_data"].is_empty());
}
