use super::*;

#[test]
fn code_mapping() {
    assert_eq!(HuntError::syntax(1, 2, "x").code_str(), "SyntaxError");
    assert_eq!(HuntError::undefined("a").code_str(), "UndefinedVariableError");
    assert_eq!(HuntError::type_mismatch("t").code_str(), "TypeMismatchError");
    assert_eq!(HuntError::schema_mismatch("s").code_str(), "SchemaMismatch");
    assert_eq!(HuntError::no_connector("n").code_str(), "NoApplicableConnector");
    assert_eq!(HuntError::analytics("m", "boom").code_str(), "AnalyticsError");
    assert_eq!(HuntError::store("io").code_str(), "StoreError");
    assert_eq!(HuntError::internal("bug").code_str(), "InternalError");
}

#[test]
fn compile_time_classification() {
    assert!(HuntError::syntax(1, 1, "bad").is_compile_time());
    assert!(HuntError::undefined("x").is_compile_time());
    assert!(HuntError::type_mismatch("x").is_compile_time());
    assert!(!HuntError::analytics("m", "crash").is_compile_time());
    assert!(!HuntError::store("disk").is_compile_time());
    assert!(!HuntError::no_connector("none").is_compile_time());
}

#[test]
fn serializes_tagged() {
    let v = serde_json::to_value(HuntError::syntax(3, 7, "unexpected token")).unwrap();
    assert_eq!(v["type"], "syntax");
    assert_eq!(v["line"], 3);
    assert_eq!(v["column"], 7);
}

#[test]
fn failure_display_names_statement() {
    let f = StatementFailure {
        statement: "c = JOIN a, b BY pid".into(),
        line: 4,
        error: HuntError::type_mismatch("cannot join process with file"),
    };
    let text = f.to_string();
    assert!(text.contains("TypeMismatchError"));
    assert!(text.contains("line 4"));
    assert!(text.contains("c = JOIN a, b BY pid"));
}

#[test]
fn anyhow_maps_to_internal() {
    let e: HuntError = anyhow::anyhow!("wrapped").into();
    assert_eq!(e.code_str(), "InternalError");
    assert!(e.message().contains("wrapped"));
}
