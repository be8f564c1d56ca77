use chrono::DateTime;
use std::time::{Duration, Instant};
use timeflow_core::{FieldValue, Point, TagSet};
use timeflow_engine::{
    BinaryOp, Database, EngineError, Expr, Field, PointIterator, Result, Row, RowValue,
    SelectStatement, Transaction,
};

const SECOND: i64 = 1_000_000_000;

/// One shard/series worth of points.
#[derive(Clone)]
struct MemSeries {
    tags: TagSet,
    points: Vec<Point>,
}

/// In-memory database: a list of series plus the known field names.
#[derive(Clone)]
struct MemDb {
    series: Vec<MemSeries>,
    fields: Vec<String>,
}

impl MemDb {
    fn new(fields: &[&str]) -> Self {
        Self {
            series: Vec::new(),
            fields: fields.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn series(mut self, tag_values: &[&str], data: &[(i64, f64)]) -> Self {
        let points = data
            .iter()
            .map(|&(ts, v)| Point::new(ts, v.to_be_bytes().to_vec(), v))
            .collect();
        self.series.push(MemSeries {
            tags: TagSet::encode(tag_values),
            points,
        });
        self
    }

    fn series_with_values(mut self, tag_values: &[&str], data: Vec<(i64, FieldValue)>) -> Self {
        let points = data
            .into_iter()
            .map(|(ts, v)| Point::new(ts, Vec::new(), v))
            .collect();
        self.series.push(MemSeries {
            tags: TagSet::encode(tag_values),
            points,
        });
        self
    }
}

struct MemTx {
    series: Vec<MemSeries>,
    fields: Vec<String>,
    opened: bool,
    now: i64,
}

struct MemIterator {
    tags: TagSet,
    points: std::vec::IntoIter<Point>,
}

impl Database for MemDb {
    type Tx = MemTx;

    fn begin(&self) -> Result<MemTx> {
        Ok(MemTx {
            series: self.series.clone(),
            fields: self.fields.clone(),
            opened: false,
            now: 0,
        })
    }
}

impl Transaction for MemTx {
    fn open(&mut self) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        Ok(())
    }

    fn set_now(&mut self, now_ns: i64) {
        self.now = now_ns;
    }

    fn create_iterators(&mut self, _stmt: &SelectStatement) -> Result<Vec<Box<dyn PointIterator>>> {
        Ok(self
            .series
            .iter()
            .map(|s| {
                Box::new(MemIterator {
                    tags: s.tags.clone(),
                    points: s.points.clone().into_iter(),
                }) as Box<dyn PointIterator>
            })
            .collect())
    }

    fn field_ids(&self, fields: &[Field]) -> Result<Vec<u8>> {
        fields
            .iter()
            .map(|f| {
                self.fields
                    .iter()
                    .position(|name| name == f.name())
                    .map(|i| i as u8)
                    .ok_or_else(|| EngineError::Storage(format!("unknown field: {}", f.name())))
            })
            .collect()
    }

    fn decode_values(&self, field_ids: &[u8], timestamp: i64, raw: &[u8]) -> Vec<FieldValue> {
        let mut values = vec![FieldValue::Integer(timestamp)];
        let decoded = <[u8; 8]>::try_from(raw)
            .map(f64::from_be_bytes)
            .unwrap_or(f64::NAN);
        for _ in field_ids {
            values.push(FieldValue::Float(decoded));
        }
        values
    }
}

impl PointIterator for MemIterator {
    fn tags(&self) -> TagSet {
        self.tags.clone()
    }

    fn next(&mut self) -> Option<Point> {
        self.points.next()
    }
}

fn planner(db: MemDb) -> timeflow_engine::Planner<MemDb> {
    timeflow_engine::Planner::new(db).with_now(|| 0)
}

fn run(db: MemDb, stmt: SelectStatement) -> Vec<Row> {
    let executor = planner(db).plan(&stmt).unwrap();
    let mut rx = executor.execute().unwrap();
    let mut rows = Vec::new();
    while let Some(row) = rx.blocking_recv() {
        rows.push(row);
    }
    rows
}

fn float_cell(row: &Row, array: usize, column: usize) -> f64 {
    match &row.values[array][column] {
        RowValue::Field(FieldValue::Float(v)) => *v,
        other => panic!("expected float cell, got {:?}", other),
    }
}

fn time_cell(row: &Row, array: usize) -> i64 {
    match &row.values[array][0] {
        RowValue::Time(t) => t.timestamp_nanos_opt().unwrap(),
        other => panic!("expected time cell, got {:?}", other),
    }
}

#[test]
fn simple_count_over_whole_stream() {
    let db = MemDb::new(&["value"]).series(
        &[],
        &[(SECOND, 1.0), (2 * SECOND, 2.0), (3 * SECOND, 3.0)],
    );
    let stmt = SelectStatement::builder("m")
        .field(Expr::call("count", vec![Expr::var_ref("value")]))
        .build()
        .unwrap();

    let rows = run(db, stmt);
    assert_eq!(rows.len(), 1);

    let row = &rows[0];
    assert_eq!(row.name, "m");
    assert_eq!(row.columns, vec!["time", "count"]);
    assert!(row.err.is_none());
    assert_eq!(row.values.len(), 1);
    assert_eq!(
        row.values[0][0],
        RowValue::Time(DateTime::from_timestamp_nanos(0))
    );
    assert_eq!(float_cell(row, 0, 1), 3.0);
}

#[test]
fn interval_sum_buckets_on_the_grid() {
    let db = MemDb::new(&["value"]).series(&[], &[(1, 10.0), (2, 20.0), (SECOND + 1, 30.0)]);
    let stmt = SelectStatement::builder("m")
        .field(Expr::call("sum", vec![Expr::var_ref("value")]))
        .group_by_time(SECOND)
        .build()
        .unwrap();

    let rows = run(db, stmt);
    assert_eq!(rows.len(), 1);

    let row = &rows[0];
    assert_eq!(row.values.len(), 2);
    assert_eq!(time_cell(row, 0), 0);
    assert_eq!(float_cell(row, 0, 1), 30.0);
    assert_eq!(time_cell(row, 1), SECOND);
    assert_eq!(float_cell(row, 1, 1), 30.0);
}

#[test]
fn percentile_of_one_through_ten() {
    let data: Vec<(i64, f64)> = (1..=10).map(|i| (i * SECOND, i as f64)).collect();
    let db = MemDb::new(&["value"]).series(&[], &data);
    let stmt = SelectStatement::builder("m")
        .field(Expr::call(
            "percentile",
            vec![Expr::var_ref("value"), Expr::number(50.0)],
        ))
        .build()
        .unwrap();

    let rows = run(db, stmt);
    assert_eq!(rows.len(), 1);
    assert_eq!(float_cell(&rows[0], 0, 1), 5.0);
}

#[test]
fn stddev_of_a_single_point_is_undefined() {
    let db = MemDb::new(&["value"]).series(&[], &[(SECOND, 42.0)]);
    let stmt = SelectStatement::builder("m")
        .field(Expr::call("stddev", vec![Expr::var_ref("value")]))
        .build()
        .unwrap();

    let rows = run(db, stmt);
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].values[0][1],
        RowValue::Field(FieldValue::String("undefined".into()))
    );
}

#[test]
fn binary_expression_with_literal() {
    let db = MemDb::new(&["value"]).series(&[], &[(1, 2.0), (2, 4.0), (3, 6.0)]);
    let stmt = SelectStatement::builder("m")
        .field(Expr::binary(
            BinaryOp::Div,
            Expr::call("sum", vec![Expr::var_ref("value")]),
            Expr::number(2.0),
        ))
        .build()
        .unwrap();

    let rows = run(db, stmt);
    assert_eq!(rows.len(), 1);
    // A binary field has no natural name, so the column is positional.
    assert_eq!(rows[0].columns, vec!["time", "col0"]);
    assert_eq!(float_cell(&rows[0], 0, 1), 6.0);
}

#[test]
fn tagset_grouping_aggregates_independently() {
    let db = MemDb::new(&["value"])
        .series(&["A"], &[(1, 1.0), (3, 1.0)])
        .series(&["B"], &[(2, 1.0)]);
    let stmt = SelectStatement::builder("m")
        .field(Expr::call("count", vec![Expr::var_ref("value")]))
        .group_by_tag("host")
        .build()
        .unwrap();

    let rows = run(db, stmt);
    assert_eq!(rows.len(), 2);

    let by_host = |host: &str| {
        rows.iter()
            .find(|r| r.tags.get("host").map(String::as_str) == Some(host))
            .unwrap()
    };
    assert_eq!(float_cell(by_host("A"), 0, 1), 2.0);
    assert_eq!(float_cell(by_host("B"), 0, 1), 1.0);

    // Deterministic (name, tagset hash) order.
    assert!(rows[0].tags_hash() <= rows[1].tags_hash());
}

#[test]
fn mean_is_stable_across_shards() {
    let db = MemDb::new(&["value"])
        .series(&[], &[(1, 1.0), (2, 2.0), (3, 3.0)])
        .series(&[], &[(4, 5.0), (5, 7.0)]);
    let stmt = SelectStatement::builder("m")
        .field(Expr::call("mean", vec![Expr::var_ref("value")]))
        .build()
        .unwrap();

    let rows = run(db, stmt);
    assert_eq!(rows.len(), 1);
    assert!((float_cell(&rows[0], 0, 1) - 3.6).abs() < 1e-12);
}

#[test]
fn raw_query_round_trips_points_in_timestamp_order() {
    let db = MemDb::new(&["value"])
        .series(&[], &[(10, 1.0), (30, 3.0)])
        .series(&[], &[(20, 2.0), (40, 4.0)]);
    let stmt = SelectStatement::builder("m")
        .field(Expr::var_ref("value"))
        .build()
        .unwrap();

    let rows = run(db, stmt);
    assert_eq!(rows.len(), 1);

    let row = &rows[0];
    assert_eq!(row.columns, vec!["time", "value"]);
    assert_eq!(row.values.len(), 4);
    let times: Vec<i64> = (0..4).map(|i| time_cell(row, i)).collect();
    assert_eq!(times, vec![10, 20, 30, 40]);
    let values: Vec<f64> = (0..4).map(|i| float_cell(row, i, 1)).collect();
    assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn raw_query_with_unknown_field_fails_at_plan_time() {
    let db = MemDb::new(&["other"]).series(&[], &[(10, 1.0)]);
    let stmt = SelectStatement::builder("m")
        .field(Expr::var_ref("value"))
        .build()
        .unwrap();

    let err = planner(db).plan(&stmt).expect_err("expected plan error");
    assert!(matches!(err, EngineError::Storage(_)));
}

#[test]
fn multiple_aggregate_fields_share_one_row() {
    let db = MemDb::new(&["value"]).series(&[], &[(1, 1.0), (2, 5.0), (3, 3.0)]);
    let stmt = SelectStatement::builder("m")
        .field(Expr::call("min", vec![Expr::var_ref("value")]))
        .field(Expr::call("max", vec![Expr::var_ref("value")]))
        .build()
        .unwrap();

    let rows = run(db, stmt);
    assert_eq!(rows.len(), 1);

    let row = &rows[0];
    assert_eq!(row.columns, vec!["time", "min", "max"]);
    assert_eq!(row.values.len(), 1);
    assert_eq!(float_cell(row, 0, 1), 1.0);
    assert_eq!(float_cell(row, 0, 2), 5.0);
}

#[test]
fn row_ordering_is_by_name_then_tags_hash() {
    let db = MemDb::new(&["value"])
        .series(&["c"], &[(1, 1.0)])
        .series(&["a"], &[(1, 1.0)])
        .series(&["b"], &[(1, 1.0)]);
    let stmt = SelectStatement::builder("m")
        .field(Expr::call("count", vec![Expr::var_ref("value")]))
        .group_by_tag("host")
        .build()
        .unwrap();

    let rows = run(db, stmt);
    assert_eq!(rows.len(), 3);
    for pair in rows.windows(2) {
        assert!(pair[0].name <= pair[1].name);
        assert!(pair[0].tags_hash() <= pair[1].tags_hash());
    }
}

#[test]
fn type_error_mid_stream_produces_single_error_row() {
    let db = MemDb::new(&["value"]).series_with_values(
        &[],
        vec![
            (1, FieldValue::Float(1.0)),
            (2, FieldValue::String("oops".into())),
        ],
    );
    let stmt = SelectStatement::builder("m")
        .field(Expr::call("sum", vec![Expr::var_ref("value")]))
        .build()
        .unwrap();

    let rows = run(db, stmt);
    assert_eq!(rows.len(), 1);
    let err = rows[0].err.as_deref().expect("expected an error row");
    assert!(err.contains("field type mismatch"), "got: {}", err);
    assert!(rows[0].values.is_empty());
}

#[test]
fn count_identity_across_many_shards() {
    // ReduceSum over MapCount equals the total point count regardless of
    // how the stream is sharded.
    let mut db = MemDb::new(&["value"]);
    let mut total = 0usize;
    for shard in 0..5i64 {
        let data: Vec<(i64, f64)> = (0..7)
            .map(|i| (shard * 1000 + i * 10 + 1, i as f64))
            .collect();
        total += data.len();
        db = db.series(&[], &data);
    }
    let stmt = SelectStatement::builder("m")
        .field(Expr::call("count", vec![Expr::var_ref("value")]))
        .build()
        .unwrap();

    let rows = run(db, stmt);
    assert_eq!(rows.len(), 1);
    assert_eq!(float_cell(&rows[0], 0, 1), total as f64);
}

#[test]
fn abandoning_the_row_channel_tears_the_plan_down() {
    let db = MemDb::new(&["value"]).series(&[], &[(1, 2.0), (2, 4.0)]);
    let stmt = SelectStatement::builder("m")
        .field(Expr::binary(
            BinaryOp::Add,
            Expr::call("sum", vec![Expr::var_ref("value")]),
            Expr::number(1.0),
        ))
        .build()
        .unwrap();

    let executor = planner(db).plan(&stmt).unwrap();
    let token = executor.cancel_token();
    let rx = executor.execute().unwrap();
    drop(rx);

    // The assembly thread cancels the query token on exit, which is what
    // stops the literal source.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !token.is_cancelled() {
        assert!(Instant::now() < deadline, "plan did not tear down");
        std::thread::sleep(Duration::from_millis(10));
    }
}
