use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_only_two_identifiers_parse() {
    assert_eq!("postgresql".parse::<EngineKind>(), Ok(EngineKind::Postgresql));
    assert_eq!("mysql".parse::<EngineKind>(), Ok(EngineKind::Mysql));
    assert_eq!(
        "sqlite".parse::<EngineKind>(),
        Err(UnknownEngine("sqlite".to_string()))
    );
    assert!("PostgreSQL".parse::<EngineKind>().is_err());
}

#[test]
fn test_id_round_trips_through_display() {
    for engine in [EngineKind::Postgresql, EngineKind::Mysql] {
        assert_eq!(engine.to_string().parse::<EngineKind>(), Ok(engine));
    }
}

#[test]
fn test_quote_ident() {
    assert_eq!(EngineKind::Postgresql.quote_ident("orders"), "orders");
    assert_eq!(EngineKind::Postgresql.quote_ident("Orders"), "\"Orders\"");
    assert_eq!(EngineKind::Mysql.quote_ident("order items"), "`order items`");
    assert_eq!(EngineKind::Mysql.quote_ident("2fa"), "`2fa`");
}
