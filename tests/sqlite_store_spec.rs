use std::sync::Arc;

use feature_overlay::models::*;
use feature_overlay::reader::{read_all, FeatureReader};
use feature_overlay::{Session, SqliteStore, Store};
use speculate2::speculate;
use tempfile::TempDir;

fn points_type() -> FeatureType {
    FeatureType::builder("points")
        .add("name", ValueKind::Text)
        .add("double", ValueKind::Double)
        .add("count", ValueKind::Int)
        .geometry("geom", Some(Crs::epsg_4326()))
        .build()
}

fn point(schema: &Arc<FeatureType>, name: &str, double: f64, x: f64, y: f64) -> Feature {
    Feature::from_pairs(
        FeatureId::new("draft"),
        schema.clone(),
        [
            ("name", Value::from(name)),
            ("double", Value::from(double)),
            ("count", Value::Null),
            ("geom", Value::from(Geometry::point(x, y))),
        ],
    )
    .expect("Failed to build feature")
}

fn setup_store() -> (SqliteStore, Arc<FeatureType>) {
    let store = SqliteStore::open_memory().expect("Failed to open database");
    store.migrate().expect("Failed to run migrations");
    let schema = store.create_type(points_type()).expect("Failed to create type");
    (store, schema)
}

fn read_names(store: &SqliteStore, predicate: Option<&Predicate>) -> Vec<String> {
    let mut reader = store.read("points", predicate).expect("Failed to read");
    let names = read_all(&mut reader)
        .expect("Failed to read")
        .iter()
        .map(|f| f.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string())
        .collect();
    reader.close().expect("Failed to close");
    names
}

speculate! {
    before {
        let (store, schema) = setup_store();
    }

    describe "feature types" {
        it "lists and describes registered types" {
            assert_eq!(store.type_names().unwrap(), vec!["points"]);
            let loaded = store.schema("points").unwrap().expect("schema should exist");
            assert_eq!(*loaded, *schema);
            assert!(store.schema("lines").unwrap().is_none());
        }

        it "rejects a duplicate type" {
            assert!(store.create_type(points_type()).is_err());
        }

        it "drops a type together with its features" {
            store.add("points", &point(&schema, "a", 1.0, 0.0, 0.0)).unwrap();
            assert!(store.drop_type("points").unwrap());
            assert!(store.schema("points").unwrap().is_none());
            assert!(!store.drop_type("points").unwrap());
        }
    }

    describe "features" {
        it "assigns sequential identities per type" {
            let first = store.add("points", &point(&schema, "a", 1.0, 0.0, 0.0)).unwrap();
            let second = store.add("points", &point(&schema, "b", 2.0, 0.0, 0.0)).unwrap();
            assert_eq!(first.as_str(), "points.1");
            assert_eq!(second.as_str(), "points.2");
        }

        it "round-trips values in insertion order" {
            store.add("points", &point(&schema, "b", 2.0, 3.0, 4.0)).unwrap();
            store.add("points", &point(&schema, "a", 1.0, 0.0, 0.0)).unwrap();

            let mut reader = store.read("points", None).unwrap();
            let features = read_all(&mut reader).unwrap();
            reader.close().unwrap();

            assert_eq!(features.len(), 2);
            assert_eq!(features[0].id().as_str(), "points.1");
            assert_eq!(features[0].get("name"), Some(&Value::from("b")));
            assert_eq!(features[0].get("double"), Some(&Value::Double(2.0)));
            assert_eq!(features[0].get("count"), Some(&Value::Null));
            assert_eq!(features[0].default_geometry(), Some(&Geometry::point(3.0, 4.0)));
        }

        it "filters reads and counts by predicate" {
            for (name, d) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
                store.add("points", &point(&schema, name, d, 0.0, 0.0)).unwrap();
            }
            let big = Predicate::compare("double", CompareOp::Ge, 2.0);

            assert_eq!(read_names(&store, Some(&big)), vec!["b", "c"]);
            assert_eq!(store.count("points", Some(&big)).unwrap(), 2);
            assert_eq!(store.count("points", None).unwrap(), 3);
            assert_eq!(read_names(&store, Some(&Predicate::id("points.3"))), vec!["c"]);
        }

        it "removes and updates matching features" {
            for (name, d) in [("alpha", 1.0), ("beta", 2.0), ("another", 3.0)] {
                store.add("points", &point(&schema, name, d, 0.0, 0.0)).unwrap();
            }

            let updated = store
                .update_matching("points", &Predicate::like("name", "a%"), &[("count".to_string(), Value::Int(7))])
                .unwrap();
            let removed = store.remove_matching("points", &Predicate::id("points.3")).unwrap();

            assert_eq!(updated, 2);
            assert_eq!(removed, 1);
            assert_eq!(read_names(&store, None), vec!["alpha", "beta"]);
            let sevens = Predicate::eq("count", 7);
            assert_eq!(store.count("points", Some(&sevens)).unwrap(), 1);
        }

        it "rejects features built against another schema" {
            let other = Arc::new(FeatureType::builder("points").add("name", ValueKind::Text).build());
            let stray = Feature::from_pairs(FeatureId::new("x"), other, [("name", Value::from("x"))]).unwrap();
            assert!(store.add("points", &stray).is_err());
        }

        it "keeps non-finite numbers out of stored rows" {
            store.add("points", &point(&schema, "a", 1.0, 0.0, 0.0)).unwrap();

            let nan = Feature::from_pairs(
                FeatureId::new("draft"),
                schema.clone(),
                [("name", Value::from("nan")), ("double", Value::Double(f64::NAN))],
            );
            assert!(matches!(nan, Err(feature_overlay::Error::InvalidValue { .. })));
            let update = store.update_matching(
                "points",
                &Predicate::Include,
                &[("double".to_string(), Value::Double(f64::INFINITY))],
            );
            assert!(update.is_err());

            assert_eq!(store.count("points", Some(&Predicate::eq("name", "a"))).unwrap(), 1);
            assert_eq!(read_names(&store, None), vec!["a"]);
        }

        it "fails reads of unknown types" {
            assert!(store.read("lines", None).is_err());
            assert!(store.count("lines", None).is_err());
        }
    }

    describe "on disk" {
        it "persists features across reopen" {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("nested").join("features.db");
            {
                let store = SqliteStore::open(path.clone()).unwrap();
                store.migrate().unwrap();
                let schema = store.create_type(points_type()).unwrap();
                store.add("points", &point(&schema, "kept", 1.0, 0.0, 0.0)).unwrap();
            }

            let reopened = SqliteStore::open(path).unwrap();
            reopened.migrate().unwrap();
            assert_eq!(reopened.count("points", None).unwrap(), 1);
            assert_eq!(read_names(&reopened, None), vec!["kept"]);
        }
    }

    describe "under a session" {
        it "commits staged changes into SQLite" {
            store.add("points", &point(&schema, "a", 1.0, 0.0, 0.0)).unwrap();
            store.add("points", &point(&schema, "b", 2.0, 0.0, 0.0)).unwrap();

            let mut session = Session::buffered(store.clone());
            let staged = session.add_features("points", vec![point(&schema, "c", 3.0, 0.0, 0.0)]).unwrap();
            session
                .update_features("points", Predicate::id(staged[0].clone()), vec![("name".to_string(), Value::from("z"))])
                .unwrap();
            session.remove_features("points", Predicate::id("points.1")).unwrap();

            assert_eq!(store.count("points", None).unwrap(), 2);
            assert_eq!(session.count(&Query::new("points")).unwrap(), 2);

            let summary = session.commit().unwrap();
            assert_eq!(summary.types["points"].added, vec![FeatureId::new("points.3")]);
            assert_eq!(summary.types["points"].updated, 1);
            assert_eq!(summary.types["points"].removed, 1);
            assert_eq!(read_names(&store, None), vec!["b", "z"]);
        }
    }
}
