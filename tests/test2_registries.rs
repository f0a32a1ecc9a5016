use std::sync::Arc;
use std::thread;

use sql_pipeline::impl_sql_custom;
use sql_pipeline::prelude::*;
use sql_pipeline::test_utils::{RecordingStatement, ScriptedSession};

#[derive(Debug, Clone, PartialEq)]
struct Point {
    x: i64,
    y: i64,
}

impl_sql_custom!(Point, "Point");

fn parse_point(raw: &RowValues) -> Result<Value, SqlPipelineError> {
    let text = raw
        .as_text()
        .ok_or_else(|| SqlPipelineError::ConversionError("point must be text".into()))?;
    let (x, y) = text
        .split_once(',')
        .ok_or_else(|| SqlPipelineError::ConversionError(format!("bad point {text}")))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<i64>()
            .map_err(|e| SqlPipelineError::ConversionError(e.to_string()))
    };
    Ok(Point {
        x: parse(x)?,
        y: parse(y)?,
    }
    .into_value())
}

fn encode_point(value: &Value) -> Result<RowValues, SqlPipelineError> {
    match value {
        Value::Custom(custom) => custom
            .downcast_ref::<Point>()
            .map(|p| RowValues::Text(format!("{},{}", p.x, p.y)))
            .ok_or_else(|| SqlPipelineError::ConversionError("not a point".into())),
        other => Err(SqlPipelineError::ConversionError(format!(
            "not a point: {other:?}"
        ))),
    }
}

#[test]
fn column_factory_adapts_into_row_mapper() -> Result<(), Box<dyn std::error::Error>> {
    let registry = MappingRegistry::new(&EngineConfig::default());
    registry.register_column(FnColumnMapperFactory::new(
        SqlType::Custom("Point"),
        parse_point,
    ));

    let mapper = registry.resolve_row(&SqlType::Custom("Point"))?;
    let row = DbRow::new(
        Arc::new(vec!["location".into()]),
        vec![RowValues::Text("3, 4".into())],
    );
    assert_eq!(Point::from_value(mapper.map(&row)?)?, Point { x: 3, y: 4 });
    Ok(())
}

#[test]
fn points_round_trip_through_a_handle() -> Result<(), Box<dyn std::error::Error>> {
    let session = ScriptedSession::new();
    session.push_rows(&["p"], vec![vec![RowValues::Text("1,2".into())]]);
    let engine = Engine::new(EngineConfig::default())?;
    engine.register_argument(FnArgumentFactory::new(SqlType::Custom("Point"), encode_point));
    engine.register_column_mapper(FnColumnMapperFactory::new(
        SqlType::Custom("Point"),
        parse_point,
    ));
    let handle = engine.open(session.clone());

    let found = handle
        .query("select p from shapes where p = :p")
        .bind("p", Point { x: 1, y: 2 })
        .select_as::<Point>()?
        .one()?;
    assert_eq!(found, Point { x: 1, y: 2 });
    assert!(session.events().contains("bind 1=Text(\"1,2\")"));
    Ok(())
}

#[test]
fn latest_registration_is_tried_first() -> Result<(), Box<dyn std::error::Error>> {
    let args = ArgumentRegistry::new(&EngineConfig::default());
    args.register(FnArgumentFactory::new(SqlType::Custom("Money"), |_| {
        Ok(RowValues::Text("older".into()))
    }));
    args.register(FnArgumentFactory::new(SqlType::Custom("Money"), |_| {
        Ok(RowValues::Text("newer".into()))
    }));

    let mut stmt = RecordingStatement::default();
    args.resolve(&SqlType::Custom("Money"), &Value::Int(5))?
        .apply(1, &mut stmt)?;
    assert_eq!(stmt.bound(1), Some(&RowValues::Text("newer".into())));

    let mappers = MappingRegistry::new(&EngineConfig::default());
    let before = mappers.resolve_row(&SqlType::I64)?;
    mappers.register_row(FnRowMapperFactory::new(SqlType::I64, |_row: &DbRow| {
        Ok(Value::Int(-1))
    }));
    let after = mappers.resolve_row(&SqlType::I64)?;
    let row = DbRow::new(Arc::new(vec!["n".into()]), vec![RowValues::Int(7)]);
    assert_eq!(before.map(&row)?, Value::Int(7));
    assert_eq!(after.map(&row)?, Value::Int(-1));
    Ok(())
}

#[test]
fn unknown_declared_type_falls_back_to_any() -> Result<(), Box<dyn std::error::Error>> {
    let args = ArgumentRegistry::new(&EngineConfig::default());
    args.register(FnArgumentFactory::new(SqlType::Custom("Point"), encode_point));

    // declared as something nobody handles; the point factory still accepts it as Any
    let point = Point { x: 5, y: 6 }.into_value();
    let mut stmt = RecordingStatement::default();
    args.resolve(&SqlType::Custom("Shape"), &point)?
        .apply(1, &mut stmt)?;
    assert_eq!(stmt.bound(1), Some(&RowValues::Text("5,6".into())));

    let orphan = Value::Custom(CustomValue::new("Orphan", 1_u8));
    assert!(matches!(
        args.resolve(&SqlType::Custom("Orphan"), &orphan),
        Err(SqlPipelineError::UnbindableValue(SqlType::Custom("Orphan")))
    ));
    Ok(())
}

#[test]
fn forks_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
    let root = ArgumentRegistry::new(&EngineConfig::default());
    let child = root.fork_child();
    let sibling = root.fork_child();
    child.register(FnArgumentFactory::new(SqlType::Custom("Point"), encode_point));

    let point = Point { x: 0, y: 0 }.into_value();
    assert!(child.resolve(&SqlType::Custom("Point"), &point).is_ok());
    assert!(root.resolve(&SqlType::Custom("Point"), &point).is_err());
    assert!(sibling.resolve(&SqlType::Custom("Point"), &point).is_err());

    root.register(FnArgumentFactory::new(SqlType::Custom("Point"), encode_point));
    assert_eq!(sibling.len(), root.len() - 1);
    Ok(())
}

#[test]
fn registries_tolerate_concurrent_registration() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Arc::new(Engine::new(EngineConfig::default())?);

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || -> Result<i64, SqlPipelineError> {
                let mut total = 0;
                for i in 0..50_i64 {
                    let session = ScriptedSession::new();
                    session.push_rows(&["n"], vec![vec![RowValues::Int(i)]]);
                    let handle = engine.open(session);
                    total += handle
                        .query("select :n")
                        .bind("n", worker)
                        .select_as::<i64>()?
                        .one()?;
                }
                Ok(total)
            })
        })
        .collect();

    for _ in 0..50 {
        engine.register_column_mapper(FnColumnMapperFactory::new(
            SqlType::Custom("Point"),
            parse_point,
        ));
    }

    for worker in workers {
        let total = worker.join().map_err(|_| "worker panicked")??;
        assert_eq!(total, (0..50).sum::<i64>());
    }
    Ok(())
}
