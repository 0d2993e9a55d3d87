use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use feature_overlay::models::*;
use feature_overlay::reader::{read_all, BoxedReader, FeatureReader};
use feature_overlay::{Error, MemoryStore, OverlayConfig, Session, SessionMode, Store};
use speculate2::speculate;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn points_type() -> FeatureType {
    FeatureType::builder("points")
        .add("name", ValueKind::Text)
        .add("double", ValueKind::Double)
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
            ("geom", Value::from(Geometry::point(x, y))),
        ],
    )
    .expect("Failed to build feature")
}

/// A store holding `points.1`..`points.3` with doubles 1, 2 and 3.
fn seeded_store() -> (MemoryStore, Arc<FeatureType>) {
    let store = MemoryStore::new();
    let schema = store.create_type(points_type()).expect("Failed to create type");
    for (i, d) in [1.0, 2.0, 3.0].into_iter().enumerate() {
        store
            .add("points", &point(&schema, &format!("p{}", i + 1), d, d, 0.0))
            .expect("Failed to seed store");
    }
    (store, schema)
}

/// Registers `sites`, a second type with the same attributes as `points`.
fn add_sites(store: &MemoryStore) -> Arc<FeatureType> {
    let mut sites = FeatureType::builder("sites");
    for attribute in points_type().attributes() {
        sites = sites.attribute(attribute.clone());
    }
    store
        .create_type(sites.default_geometry("geom").build())
        .expect("Failed to create type")
}

fn all() -> Query {
    Query::new("points")
}

fn doubles(mut reader: BoxedReader) -> Vec<f64> {
    let out = read_all(&mut reader)
        .expect("Failed to read")
        .iter()
        .map(|f| f.get("double").and_then(|v| v.as_f64()).unwrap_or(f64::NAN))
        .collect();
    reader.close().expect("Failed to close");
    out
}

fn ids(mut reader: BoxedReader) -> Vec<String> {
    let out = read_all(&mut reader)
        .expect("Failed to read")
        .iter()
        .map(|f| f.id().to_string())
        .collect();
    reader.close().expect("Failed to close");
    out
}

fn set(name: &str, value: impl Into<Value>) -> Vec<(String, Value)> {
    vec![(name.to_string(), value.into())]
}

/// Delegates to a [`MemoryStore`], counting reader closes and failing
/// updates of the listed types.
#[derive(Clone)]
struct FlakyStore {
    inner: MemoryStore,
    closes: Arc<AtomicUsize>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl FlakyStore {
    fn fail_updates_of(&self, type_name: &str) {
        self.failing.lock().unwrap().insert(type_name.to_string());
    }

    fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

struct CountingReader {
    inner: BoxedReader,
    closes: Arc<AtomicUsize>,
}

impl FeatureReader for CountingReader {
    fn feature_type(&self) -> &Arc<FeatureType> {
        self.inner.feature_type()
    }

    fn has_next(&mut self) -> feature_overlay::Result<bool> {
        self.inner.has_next()
    }

    fn next(&mut self) -> feature_overlay::Result<Feature> {
        self.inner.next()
    }

    fn close(&mut self) -> feature_overlay::Result<()> {
        self.closes.fetch_add(1, AtomicOrdering::SeqCst);
        self.inner.close()
    }
}

impl Store for FlakyStore {
    fn type_names(&self) -> anyhow::Result<Vec<String>> {
        self.inner.type_names()
    }

    fn schema(&self, type_name: &str) -> anyhow::Result<Option<Arc<FeatureType>>> {
        self.inner.schema(type_name)
    }

    fn read(&self, type_name: &str, predicate: Option<&Predicate>) -> anyhow::Result<BoxedReader> {
        Ok(Box::new(CountingReader {
            inner: self.inner.read(type_name, predicate)?,
            closes: self.closes.clone(),
        }))
    }

    fn count(&self, type_name: &str, predicate: Option<&Predicate>) -> anyhow::Result<usize> {
        self.inner.count(type_name, predicate)
    }

    fn add(&self, type_name: &str, feature: &Feature) -> anyhow::Result<FeatureId> {
        self.inner.add(type_name, feature)
    }

    fn remove_matching(&self, type_name: &str, predicate: &Predicate) -> anyhow::Result<usize> {
        self.inner.remove_matching(type_name, predicate)
    }

    fn update_matching(
        &self,
        type_name: &str,
        predicate: &Predicate,
        values: &[(String, Value)],
    ) -> anyhow::Result<usize> {
        if self.failing.lock().unwrap().contains(type_name) {
            anyhow::bail!("disk full");
        }
        self.inner.update_matching(type_name, predicate, values)
    }
}

speculate! {
    before {
        init_tracing();
        let (store, schema) = seeded_store();
        let mut session = Session::buffered(store.clone());
    }

    describe "reading through pending changes" {
        it "sees the store unchanged with an empty log" {
            assert_eq!(session.count(&all()).unwrap(), 3);
            assert_eq!(ids(session.query(&all()).unwrap()), vec!["points.1", "points.2", "points.3"]);
            assert!(!session.has_pending_changes());
        }

        it "includes staged additions without touching the store" {
            session.add_features("points", vec![point(&schema, "extra", 2.5, 2.5, 0.0)]).unwrap();

            assert_eq!(session.count(&all()).unwrap(), 4);
            assert_eq!(store.count("points", None).unwrap(), 3);
            let sorted = session.query(&all().sort(SortSpec::ascending("double"))).unwrap();
            assert_eq!(doubles(sorted), vec![1.0, 2.0, 2.5, 3.0]);
        }

        it "hides features matched by a staged removal" {
            session.remove_features("points", Predicate::id("points.3")).unwrap();

            let by_id = all().filter(Predicate::id("points.3"));
            assert_eq!(session.count(&by_id).unwrap(), 0);
            assert_eq!(store.count("points", Some(&Predicate::id("points.3"))).unwrap(), 1);
        }

        it "applies disjoint updates independently" {
            session.update_features("points", Predicate::id("points.1"), set("name", "one")).unwrap();
            session.update_features("points", Predicate::id("points.2"), set("name", "two")).unwrap();

            let mut reader = session.query(&all()).unwrap();
            let features = read_all(&mut reader).unwrap();
            reader.close().unwrap();
            assert_eq!(features[0].get("name"), Some(&Value::from("one")));
            assert_eq!(features[1].get("name"), Some(&Value::from("two")));
            assert_eq!(features[2].get("name"), Some(&Value::from("p3")));
        }

        it "lets later updates win attribute by attribute" {
            let mut values = set("name", "x");
            values.push(("double".to_string(), Value::Double(5.0)));
            session.update_features("points", Predicate::id("points.1"), values).unwrap();
            session.update_features("points", Predicate::id("points.1"), set("double", 6.0)).unwrap();

            let mut reader = session.query(&all().filter(Predicate::id("points.1"))).unwrap();
            let f = reader.next().unwrap();
            reader.close().unwrap();
            assert_eq!(f.get("name"), Some(&Value::from("x")));
            assert_eq!(f.get("double"), Some(&Value::Double(6.0)));
        }

        it "treats a re-add after a removal as a new feature" {
            session.remove_features("points", Predicate::Include).unwrap();
            session.add_features("points", vec![point(&schema, "again", 7.0, 0.0, 0.0)]).unwrap();

            assert_eq!(session.count(&all()).unwrap(), 1);
            assert_eq!(doubles(session.query(&all()).unwrap()), vec![7.0]);
        }

        it "matches features that only satisfy the predicate after an update" {
            session.update_features("points", Predicate::id("points.1"), set("double", 10.0)).unwrap();

            let big = all().filter(Predicate::compare("double", CompareOp::Gt, 5.0));
            assert_eq!(session.count(&big).unwrap(), 1);
            assert_eq!(ids(session.query(&big).unwrap()), vec!["points.1"]);
        }

        it "evaluates removals against the updated state" {
            session.update_features("points", Predicate::id("points.1"), set("name", "gone")).unwrap();
            session.remove_features("points", Predicate::eq("name", "gone")).unwrap();

            assert_eq!(ids(session.query(&all()).unwrap()), vec!["points.2", "points.3"]);
            assert_eq!(store.count("points", None).unwrap(), 3);
        }

        it "counts regardless of sorting and paging" {
            session.add_features("points", vec![point(&schema, "extra", 2.5, 0.0, 0.0)]).unwrap();
            let paged = all().sort(SortSpec::ascending("double")).offset(1).limit(2);

            assert_eq!(session.count(&paged).unwrap(), 4);
            assert_eq!(doubles(session.query(&paged).unwrap()), vec![2.0, 2.5]);
        }

        it "keeps a reader on the snapshot taken when it was built" {
            let mut reader = session.query(&all()).unwrap();
            session.add_features("points", vec![point(&schema, "late", 9.0, 0.0, 0.0)]).unwrap();
            session.remove_features("points", Predicate::id("points.1")).unwrap();

            let features = read_all(&mut reader).unwrap();
            reader.close().unwrap();
            assert_eq!(features.len(), 3);
            assert_eq!(session.count(&all()).unwrap(), 3);
        }

        it "reports the bounds of reconciled features" {
            session.add_features("points", vec![point(&schema, "far", 0.0, 10.0, 5.0)]).unwrap();
            session.remove_features("points", Predicate::id("points.1")).unwrap();

            let bounds = session.bounds(&all()).unwrap();
            assert_eq!(bounds, Envelope::new(2.0, 0.0, 10.0, 5.0));
        }

        it "evaluates bounding boxes given in another CRS" {
            let lon_lat = Envelope::new(-0.5, 1.5, 0.5, 2.5);
            let query = all().filter(Predicate::bbox("geom", lon_lat, Some(Crs::crs84())));

            assert_eq!(session.count(&query).unwrap(), 1);
            session.update_features("points", Predicate::id("points.2"), set("name", "two")).unwrap();
            assert_eq!(ids(session.query(&query).unwrap()), vec!["points.2"]);
        }

        it "stages removals whose bounding box is given in another CRS" {
            let lon_lat = Envelope::new(-0.5, 1.5, 0.5, 2.5);
            session
                .remove_features("points", Predicate::bbox("geom", lon_lat, Some(Crs::crs84())))
                .unwrap();

            assert_eq!(ids(session.query(&all()).unwrap()), vec!["points.1", "points.3"]);
            assert_eq!(session.commit().unwrap().types["points"].removed, 1);
            assert_eq!(store.count("points", None).unwrap(), 2);
        }

        it "stages updates whose bounding box is given in another CRS" {
            let lon_lat = Envelope::new(-0.5, 2.5, 0.5, 3.5);
            session
                .update_features("points", Predicate::bbox("geom", lon_lat, Some(Crs::crs84())), set("name", "east"))
                .unwrap();

            let east = all().filter(Predicate::eq("name", "east"));
            assert_eq!(ids(session.query(&east).unwrap()), vec!["points.3"]);
            assert_eq!(session.commit().unwrap().types["points"].updated, 1);
        }

        it "reprojects and retypes staged features" {
            session.add_features("points", vec![point(&schema, "extra", 4.0, 1.0, 0.0)]).unwrap();
            let target = Arc::new(schema.select(&["name", "geom"]).unwrap());
            let query = all()
                .filter(Predicate::eq("name", "extra"))
                .retype(target)
                .reproject(Crs::crs84());

            let mut reader = session.query(&query).unwrap();
            let f = reader.next().unwrap();
            reader.close().unwrap();
            let attrs: Vec<&str> = f.feature_type().attribute_names().collect();
            assert_eq!(attrs, vec!["name", "geom"]);
            assert_eq!(f.default_geometry(), Some(&Geometry::point(0.0, 1.0)));
            assert_eq!(f.feature_type().crs(), Some(&Crs::crs84()));
        }
    }

    describe "errors" {
        it "rejects unknown types" {
            assert!(matches!(session.count(&Query::new("lines")), Err(Error::UnknownType(_))));
            assert!(matches!(
                session.remove_features("lines", Predicate::Include),
                Err(Error::UnknownType(_))
            ));
        }

        it "rejects updates naming unknown attributes" {
            let result = session.update_features("points", Predicate::Include, set("colour", "red"));
            assert!(matches!(result, Err(Error::UnknownAttribute(_))));
            assert!(!session.has_pending_changes());
        }

        it "rejects updates with values of the wrong kind" {
            let result = session.update_features("points", Predicate::Include, set("double", "high"));
            assert!(matches!(result, Err(Error::InvalidValue { .. })));
        }
    }

    describe "commit" {
        it "publishes staged additions to the store" {
            let staged = session.add_features("points", vec![point(&schema, "extra", 2.5, 0.0, 0.0)]).unwrap();
            assert!(staged[0].is_placeholder());

            let summary = session.commit().unwrap();
            assert_eq!(summary.types["points"].added, vec![FeatureId::new("points.4")]);
            assert_eq!(store.count("points", None).unwrap(), 4);
            assert_eq!(session.count(&all()).unwrap(), 4);
            assert!(!session.has_pending_changes());
        }

        it "publishes staged removals to the store" {
            session.remove_features("points", Predicate::id("points.3")).unwrap();
            let summary = session.commit().unwrap();

            assert_eq!(summary.types["points"].removed, 1);
            assert_eq!(store.count("points", Some(&Predicate::id("points.3"))).unwrap(), 0);
            assert_eq!(session.count(&all().filter(Predicate::id("points.3"))).unwrap(), 0);
        }

        it "maps placeholder identities onto store identities" {
            let staged = session.add_features("points", vec![point(&schema, "extra", 2.5, 0.0, 0.0)]).unwrap();
            session.update_features("points", Predicate::id(staged[0].clone()), set("double", 9.0)).unwrap();

            session.commit().unwrap();
            let nine = all().filter(Predicate::compare("double", CompareOp::Eq, 9.0));
            assert_eq!(ids(session.query(&nine).unwrap()), vec!["points.4"]);
        }

        it "does nothing without pending changes" {
            let summary = session.commit().unwrap();
            assert!(summary.types.is_empty());
            assert_eq!(store.count("points", None).unwrap(), 3);
        }
    }

    describe "rollback" {
        it "discards every pending change" {
            session.add_features("points", vec![point(&schema, "extra", 2.5, 0.0, 0.0)]).unwrap();
            session.remove_features("points", Predicate::id("points.1")).unwrap();
            session.rollback();

            assert!(!session.has_pending_changes());
            assert!(session.pending_changes("points").is_empty());
            assert_eq!(session.count(&all()).unwrap(), 3);
            assert_eq!(store.count("points", None).unwrap(), 3);
        }
    }

    describe "direct mode" {
        it "applies mutations to the store immediately" {
            let mut direct = Session::direct(store.clone());
            let added = direct.add_features("points", vec![point(&schema, "extra", 2.5, 0.0, 0.0)]).unwrap();

            assert_eq!(added, vec![FeatureId::new("points.4")]);
            assert_eq!(store.count("points", None).unwrap(), 4);
            direct.remove_features("points", Predicate::id("points.1")).unwrap();
            assert_eq!(store.count("points", None).unwrap(), 3);
            assert!(!direct.has_pending_changes());
        }

        it "surfaces predicate errors unchanged" {
            let mut direct = Session::direct(store.clone());
            let result = direct.remove_features("points", Predicate::eq("colour", "red"));
            assert!(matches!(result, Err(Error::UnknownAttribute(_))));
            let result = direct.update_features("points", Predicate::eq("colour", "red"), set("name", "x"));
            assert!(matches!(result, Err(Error::UnknownAttribute(_))));
        }

        it "follows the configured default mode" {
            let config = OverlayConfig {
                default_mode: SessionMode::Direct,
                database_path: None,
            };
            assert_eq!(Session::from_config(store.clone(), &config).mode(), SessionMode::Direct);
            assert_eq!(session.mode(), SessionMode::Buffered);
        }
    }

    describe "store interaction" {
        before {
            let flaky = FlakyStore {
                inner: store.clone(),
                closes: Arc::new(AtomicUsize::new(0)),
                failing: Arc::new(Mutex::new(HashSet::new())),
            };
            let mut overlay = Session::buffered(flaky.clone());
        }

        it "closes the store reader once when the session reader is closed" {
            overlay.add_features("points", vec![point(&schema, "extra", 2.5, 0.0, 0.0)]).unwrap();
            let mut reader = overlay
                .query(&all().sort(SortSpec::ascending("double")).limit(1))
                .unwrap();
            reader.close().unwrap();
            reader.close().unwrap();
            assert_eq!(flaky.closes.load(AtomicOrdering::SeqCst), 1);
        }

        it "keeps failed and later deltas pending after a partial commit" {
            overlay.add_features("points", vec![point(&schema, "extra", 2.5, 0.0, 0.0)]).unwrap();
            overlay.update_features("points", Predicate::id("points.2"), set("name", "two")).unwrap();
            overlay.remove_features("points", Predicate::id("points.1")).unwrap();
            flaky.fail_updates_of("points");

            match overlay.commit() {
                Err(Error::Commit { failures }) => {
                    assert_eq!(failures.len(), 1);
                    match &failures[0] {
                        Error::StoreFailure { type_name, delta_index, .. } => {
                            assert_eq!(type_name, "points");
                            assert_eq!(*delta_index, Some(1));
                        }
                        other => panic!("expected StoreFailure, got {:?}", other),
                    }
                }
                other => panic!("expected Commit failure, got {:?}", other),
            }

            assert_eq!(store.count("points", None).unwrap(), 4);
            let pending: Vec<&str> = overlay.pending_changes("points").iter().map(|d| d.kind()).collect();
            assert_eq!(pending, vec!["modify", "remove"]);
            assert_eq!(overlay.count(&all()).unwrap(), 3);

            flaky.heal();
            let summary = overlay.commit().unwrap();
            assert_eq!(summary.types["points"].updated, 1);
            assert_eq!(summary.types["points"].removed, 1);
            assert!(!overlay.has_pending_changes());
            assert_eq!(store.count("points", None).unwrap(), 3);
        }

        it "commits healthy types when another type fails" {
            let sites = add_sites(&store);
            overlay.add_features("sites", vec![point(&sites, "depot", 1.0, 0.0, 0.0)]).unwrap();
            overlay.update_features("sites", Predicate::Include, set("name", "renamed")).unwrap();
            overlay.add_features("points", vec![point(&schema, "extra", 2.5, 0.0, 0.0)]).unwrap();
            overlay.remove_features("points", Predicate::id("points.1")).unwrap();
            flaky.fail_updates_of("sites");

            match overlay.commit() {
                Err(Error::Commit { failures }) => {
                    assert_eq!(failures.len(), 1);
                    assert!(matches!(
                        &failures[0],
                        Error::StoreFailure { type_name, delta_index: Some(1), .. } if type_name == "sites"
                    ));
                }
                other => panic!("expected Commit failure, got {:?}", other),
            }

            assert_eq!(store.count("points", None).unwrap(), 3);
            assert!(overlay.pending_changes("points").is_empty());
            assert_eq!(store.count("sites", None).unwrap(), 1);
            let pending: Vec<&str> = overlay.pending_changes("sites").iter().map(|d| d.kind()).collect();
            assert_eq!(pending, vec!["modify"]);
        }

        it "reports one failure per failing type" {
            let sites = add_sites(&store);
            overlay.update_features("points", Predicate::Include, set("name", "x")).unwrap();
            overlay.add_features("sites", vec![point(&sites, "depot", 1.0, 0.0, 0.0)]).unwrap();
            overlay.update_features("sites", Predicate::Include, set("name", "y")).unwrap();
            flaky.fail_updates_of("points");
            flaky.fail_updates_of("sites");

            match overlay.commit() {
                Err(Error::Commit { failures }) => {
                    let failed: Vec<(String, Option<usize>)> = failures
                        .iter()
                        .map(|f| match f {
                            Error::StoreFailure { type_name, delta_index, .. } => (type_name.clone(), *delta_index),
                            other => panic!("expected StoreFailure, got {:?}", other),
                        })
                        .collect();
                    assert_eq!(
                        failed,
                        vec![("points".to_string(), Some(0)), ("sites".to_string(), Some(1))]
                    );
                }
                other => panic!("expected Commit failure, got {:?}", other),
            }
            assert_eq!(store.count("sites", None).unwrap(), 1);
        }
    }
}
