#![cfg(feature = "native")]

mod common;

use std::collections::BTreeMap;

use common::*;
use netabase_kv::{Binary, Blob, KvError, Value};

const DRIVERS: [&str; 4] = ["structured", "relational", "flat", "memory"];

fn samples() -> Vec<(&'static str, Value)> {
    let mut office = BTreeMap::new();
    office.insert("name".to_string(), Value::from("Initech"));
    office.insert("floors".to_string(), Value::Int(3));
    office.insert(
        "staff".to_string(),
        Value::Array(vec!["Peter".into(), "Milton".into()]),
    );

    vec![
        ("string", Value::from("I am a string")),
        ("empty string", Value::from("")),
        ("int", Value::Int(-546)),
        ("float", Value::Float(3.25)),
        ("true", Value::Bool(true)),
        ("false", Value::Bool(false)),
        ("null", Value::Null),
        ("array", Value::Array(vec![Value::Int(1), Value::from("two"), Value::Null])),
        ("object", Value::Object(office)),
        ("buffer", Binary::ArrayBuffer(vec![0, 1, 2, 255]).into()),
        ("blob", Binary::Blob(Blob::new("image/png", vec![137, 80, 78, 71])).into()),
        ("int8", Binary::Int8Array(vec![-128, 0, 127]).into()),
        ("uint8", Binary::Uint8Array(vec![0, 200, 255]).into()),
        ("clamped", Binary::Uint8ClampedArray(vec![255, 0]).into()),
        ("int16", Binary::Int16Array(vec![i16::MIN, -1, i16::MAX]).into()),
        ("uint16", Binary::Uint16Array(vec![0, u16::MAX]).into()),
        ("int32", Binary::Int32Array(vec![i32::MIN, 42]).into()),
        ("uint32", Binary::Uint32Array(vec![u32::MAX]).into()),
        ("float32", Binary::Float32Array(vec![1.5, -0.25]).into()),
        ("float64", Binary::Float64Array(vec![std::f64::consts::PI]).into()),
        ("empty buffer", Binary::ArrayBuffer(Vec::new()).into()),
    ]
}

#[tokio::test]
async fn every_type_round_trips_on_every_backend() {
    for driver in DRIVERS {
        let (env, _dir) = test_env();
        let store = store_on(&env, driver);
        for (key, value) in samples() {
            let stored = store.set_item(key, value.clone()).await.unwrap();
            assert_eq!(stored, value, "{driver}: {key}");
            assert_eq!(store.get_item(key).await.unwrap(), value, "{driver}: {key}");
        }
        assert_eq!(store.length().await.unwrap(), samples().len());
    }
}

#[tokio::test]
async fn blob_keeps_its_mime_type() {
    for driver in DRIVERS {
        let (env, _dir) = test_env();
        let store = store_on(&env, driver);
        store
            .set_item("doc", Binary::Blob(Blob::new("text/plain", b"hello".to_vec())))
            .await
            .unwrap();
        match store.get_item("doc").await.unwrap() {
            Value::Binary(Binary::Blob(blob)) => {
                assert_eq!(blob.mime, "text/plain", "{driver}");
                assert_eq!(blob.bytes, b"hello");
            }
            other => panic!("{driver}: expected a blob, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn nested_binary_only_fits_the_structured_store() {
    let nested = Value::Array(vec![Binary::Uint8Array(vec![1, 2]).into()]);

    let (env, _dir) = test_env();
    let structured = store_on(&env, "structured");
    structured.set_item("nested", nested.clone()).await.unwrap();
    assert_eq!(structured.get_item("nested").await.unwrap(), nested);

    for driver in ["relational", "flat", "memory"] {
        let store = store_on(&env, driver);
        let err = store.set_item("nested", nested.clone()).await.unwrap_err();
        assert!(matches!(err, KvError::Serialization(_)), "{driver}: {err}");
        // A failed write leaves nothing behind.
        assert_eq!(store.get_item("nested").await.unwrap(), Value::Null);
    }
}

#[tokio::test]
async fn serializable_structs_round_trip() {
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Employee {
        name: String,
        stapler: bool,
        desk: u32,
    }

    let milton = Employee {
        name: "Milton".into(),
        stapler: true,
        desk: 7,
    };
    let (env, _dir) = test_env();
    let store = store_on(&env, "flat");
    store
        .set_item("milton", Value::from_serializable(&milton).unwrap())
        .await
        .unwrap();
    let back: Employee = store.get_item("milton").await.unwrap().into_typed().unwrap();
    assert_eq!(back, milton);
}
