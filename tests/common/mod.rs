use stratum::catalog::{Column, DataType, Database, Value};
use stratum::common::logger::initialize_logger;

pub fn init() {
    initialize_logger();
}

/// A database with one `users` table and a couple of rows, including a NULL.
pub fn sample_db() -> Database {
    let mut db = Database::new();
    db.create_table(
        "users",
        vec![
            Column::not_null("id", DataType::Integer),
            Column::new("name", DataType::Text),
            Column::new("active", DataType::Boolean),
        ],
        "id",
    )
    .unwrap();
    let table = db.get_table_mut("users").unwrap();
    table
        .insert_row(vec![
            Value::Integer(1),
            Value::Text("ada".to_string()),
            Value::Boolean(true),
        ])
        .unwrap();
    table
        .insert_row(vec![Value::Integer(2), Value::Null, Value::Boolean(false)])
        .unwrap();
    db
}

/// A database with `count` rows of mixed values in a single table.
pub fn bulk_db(count: usize) -> Database {
    let mut db = Database::new();
    db.create_table(
        "events",
        vec![
            Column::not_null("id", DataType::Integer),
            Column::new("label", DataType::Text),
            Column::new("weight", DataType::Float),
        ],
        "id",
    )
    .unwrap();
    let table = db.get_table_mut("events").unwrap();
    for i in 0..count {
        let label = if i % 7 == 0 {
            Value::Null
        } else {
            Value::Text(format!("event-{}", i))
        };
        table
            .insert_row(vec![Value::Integer(i as i64), label, Value::Float(i as f64 * 0.5)])
            .unwrap();
    }
    db
}
