use sql_pipeline::prelude::*;
use sql_pipeline::test_utils::ScriptedSession;

fn open(session: &ScriptedSession) -> Result<Handle, SqlPipelineError> {
    Ok(Engine::new(EngineConfig::default())?.open(session.clone()))
}

fn ids(n: i64) -> Vec<Vec<RowValues>> {
    (1..=n).map(|i| vec![RowValues::Int(i)]).collect()
}

#[test]
fn last_row_closes_the_statement() -> Result<(), Box<dyn std::error::Error>> {
    let session = ScriptedSession::new();
    session.push_rows(&["id"], ids(2));
    let handle = open(&session)?;

    let mut rows = handle.query("select id from t").select_as::<i64>()?;
    assert!(rows.has_next()?);
    assert!(rows.has_next()?);
    assert_eq!(rows.next_row()?, 1);
    assert!(!rows.is_closed());
    assert_eq!(rows.next_row()?, 2);
    assert!(rows.is_closed());
    assert!(!rows.has_next()?);
    assert!(matches!(rows.next_row(), Err(SqlPipelineError::NoSuchElement)));
    rows.close()?;

    assert_eq!(
        session.events().take(),
        vec![
            "prepare select id from t",
            "execute",
            "close cursor",
            "close statement",
        ]
    );
    Ok(())
}

#[test]
fn unbound_leading_positions_fail_at_bind_time() -> Result<(), Box<dyn std::error::Error>> {
    let session = ScriptedSession::new();
    let handle = open(&session)?;

    let err = handle
        .query("select * from t where a = ? and b = ? and c = ?")
        .bind_at(2, 9_i64)
        .dml()
        .unwrap_err();
    assert!(matches!(
        err,
        SqlPipelineError::UnresolvedParameter {
            name: None,
            position: 0
        }
    ));
    // prepared, never bound or executed, still released
    assert_eq!(
        session.events().take(),
        vec![
            "prepare select * from t where a = ? and b = ? and c = ?",
            "close statement",
        ]
    );
    Ok(())
}

#[test]
fn repeated_name_binds_every_slot() -> Result<(), Box<dyn std::error::Error>> {
    let session = ScriptedSession::new();
    let handle = open(&session)?;

    handle
        .query("select * from t where a = :x and b = :x")
        .bind("x", 5_i64)
        .dml()?;
    assert_eq!(
        session.events().take(),
        vec![
            "prepare select * from t where a = ? and b = ?",
            "bind 1=Int(5)",
            "bind 2=Int(5)",
            "execute",
            "close statement",
        ]
    );
    Ok(())
}

#[test]
fn named_slot_falls_back_to_its_index() -> Result<(), Box<dyn std::error::Error>> {
    let session = ScriptedSession::new();
    let handle = open(&session)?;

    handle
        .query("select :a, :b")
        .bind("a", "one".to_string())
        .bind_at(1, 2_i64)
        .dml()?;
    let events = session.events().take();
    assert!(events.contains(&"bind 1=Text(\"one\")".to_string()));
    assert!(events.contains(&"bind 2=Int(2)".to_string()));

    let err = handle.query("select :a, :b").bind("a", 1_i64).dml().unwrap_err();
    let SqlPipelineError::UnresolvedParameter { name, position } = err else {
        panic!("expected an unresolved parameter");
    };
    assert_eq!(name.as_deref(), Some("b"));
    assert_eq!(position, 1);
    Ok(())
}

#[test]
fn handle_cleanup_runs_after_cursor_and_statement() -> Result<(), Box<dyn std::error::Error>> {
    let session = ScriptedSession::new();
    session.push_rows(&["id"], ids(1));
    let handle = open(&session)?;
    handle.begin()?;

    let rows = handle
        .query("select id from t")
        .cleanup_handle_commit()
        .select_as::<i64>()?
        .list()?;
    assert_eq!(rows, vec![1]);
    assert!(handle.is_closed());
    assert_eq!(
        session.events().take(),
        vec![
            "begin",
            "prepare select id from t",
            "execute",
            "close cursor",
            "close statement",
            "commit",
            "close session",
        ]
    );
    Ok(())
}

#[test]
fn statement_without_result_set_has_no_rows() -> Result<(), Box<dyn std::error::Error>> {
    let session = ScriptedSession::new();
    session.push_row_count(4);
    let handle = open(&session)?;

    let err = handle.query("update t set a = 1").select().unwrap_err();
    assert!(matches!(err, SqlPipelineError::NoResults));
    assert!(session.events().contains("close statement"));
    Ok(())
}

#[test]
fn empty_result_set_is_not_an_error() -> Result<(), Box<dyn std::error::Error>> {
    let session = ScriptedSession::new();
    session.push_rows(&["id"], Vec::new());
    let handle = open(&session)?;

    let mut rows = handle.query("select id from t").select()?;
    assert!(!rows.has_next()?);
    assert!(rows.is_closed());

    session.push_rows(&["one"], Vec::new());
    assert_eq!(handle.query("select 1").select()?.find_first()?, None);
    Ok(())
}

#[test]
fn dropping_an_open_iterator_releases_it() -> Result<(), Box<dyn std::error::Error>> {
    let session = ScriptedSession::new();
    session.push_rows(&["id"], ids(3));
    let handle = open(&session)?;

    {
        let mut rows = handle.query("select id from t").select_as::<i64>()?;
        assert_eq!(rows.next().transpose()?, Some(1));
        assert!(!rows.is_closed());
    }
    let events = session.events().take();
    assert_eq!(
        &events[events.len() - 2..],
        ["close cursor".to_string(), "close statement".to_string()]
    );
    Ok(())
}

#[test]
fn release_failures_are_all_reported() -> Result<(), Box<dyn std::error::Error>> {
    let session = ScriptedSession::new();
    session.push_rows(&["id"], ids(1));
    session.fail_cursor_close();
    session.fail_statement_close();
    let handle = open(&session)?;

    let err = handle
        .query("select id from t")
        .select_as::<i64>()?
        .list()
        .unwrap_err();
    let SqlPipelineError::Cleanup(failure) = err else {
        panic!("expected aggregated cleanup failure");
    };
    assert_eq!(failure.len(), 2);
    assert!(failure.primary().to_string().contains("cursor close"));
    assert!(failure.secondary()[0].to_string().contains("statement close"));
    Ok(())
}

#[test]
fn mapping_failure_closes_before_returning() -> Result<(), Box<dyn std::error::Error>> {
    let session = ScriptedSession::new();
    session.push_rows(&["name"], vec![vec![RowValues::Text("not a number".into())]]);
    let handle = open(&session)?;

    let mut rows = handle.query("select name from t").select_as::<i64>()?;
    assert!(rows.next_row().is_err());
    assert!(rows.is_closed());
    assert!(rows.next().is_none());
    Ok(())
}
