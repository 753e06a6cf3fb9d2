use invoice_copilot::application::services::{QueryValidationError, ScopePolicy, scope_query};
use invoice_copilot::domain::UserId;

fn user() -> UserId {
    UserId::new()
}

fn policy() -> ScopePolicy {
    ScopePolicy::invoice_schema()
}

#[test]
fn given_simple_select_when_scoping_then_owned_table_is_filtered() {
    let user_id = user();

    let scoped = scope_query("SELECT SUM(total) FROM invoices", user_id, &policy()).unwrap();

    assert_eq!(scoped.scoped_references, 1);
    assert!(scoped.sql.contains(&format!("\"user_id\" = '{}'", user_id)));
    assert!(scoped.sql.contains("AS invoices"));
}

#[test]
fn given_join_with_aliases_when_scoping_then_every_owned_reference_is_filtered() {
    let sql = "SELECT i.vendor_name, SUM(l.line_total) FROM invoices i \
               JOIN invoice_line_items l ON l.invoice_id = i.id \
               JOIN catalog_entities c ON c.id = l.product_id GROUP BY i.vendor_name";

    let scoped = scope_query(sql, user(), &policy()).unwrap();

    assert_eq!(scoped.scoped_references, 2);
    assert!(scoped.sql.contains("AS i"));
    assert!(scoped.sql.contains("AS l"));
}

#[test]
fn given_subqueries_and_ctes_when_scoping_then_nested_references_are_filtered() {
    let sql = "WITH recent AS (SELECT * FROM invoices WHERE created_at > now() - INTERVAL '30 days') \
               SELECT * FROM recent WHERE total > (SELECT AVG(total) FROM invoices) \
               AND EXISTS (SELECT 1 FROM extraction_jobs j WHERE j.id = recent.job_id)";

    let scoped = scope_query(sql, user(), &policy()).unwrap();

    assert_eq!(scoped.scoped_references, 3);
}

#[test]
fn given_union_when_scoping_then_both_branches_are_filtered() {
    let sql = "SELECT id FROM invoices UNION ALL SELECT invoice_id FROM invoice_line_items";

    let scoped = scope_query(sql, user(), &policy()).unwrap();

    assert_eq!(scoped.scoped_references, 2);
}

#[test]
fn given_model_filter_for_other_user_when_scoping_then_own_filter_still_applies() {
    let user_id = user();
    let sql = "SELECT * FROM invoices WHERE user_id = '00000000-0000-0000-0000-000000000001'";

    let scoped = scope_query(sql, user_id, &policy()).unwrap();

    assert!(scoped.sql.contains(&user_id.to_string()));
    assert_eq!(scoped.scoped_references, 1);
}

#[test]
fn given_shared_table_only_when_scoping_then_no_rewrite() {
    let scoped = scope_query("SELECT name FROM catalog_entities", user(), &policy()).unwrap();

    assert_eq!(scoped.scoped_references, 0);
}

#[test]
fn given_mutating_statements_when_scoping_then_rejected() {
    for sql in [
        "DELETE FROM invoices",
        "UPDATE invoices SET total = 0",
        "INSERT INTO invoices (id) VALUES ('x')",
        "DROP TABLE invoices",
    ] {
        let result = scope_query(sql, user(), &policy());
        assert!(
            matches!(
                result,
                Err(QueryValidationError::NotReadOnly(_)) | Err(QueryValidationError::Unparseable(_))
            ),
            "{sql} was not rejected: {result:?}"
        );
    }
}

#[test]
fn given_multiple_statements_when_scoping_then_rejected() {
    let result = scope_query("SELECT 1; DELETE FROM invoices", user(), &policy());

    assert_eq!(result, Err(QueryValidationError::StatementCount(2)));
}

#[test]
fn given_locking_clause_when_scoping_then_rejected() {
    let result = scope_query("SELECT * FROM invoices FOR UPDATE", user(), &policy());

    assert_eq!(result, Err(QueryValidationError::LockingClause));
}

#[test]
fn given_denied_function_when_scoping_then_rejected() {
    let result = scope_query("SELECT pg_sleep(10)", user(), &policy());

    assert_eq!(
        result,
        Err(QueryValidationError::DeniedFunction("pg_sleep".to_string()))
    );
}

#[test]
fn given_unknown_or_system_table_when_scoping_then_rejected() {
    assert_eq!(
        scope_query("SELECT * FROM users", user(), &policy()),
        Err(QueryValidationError::UnknownTable("users".to_string()))
    );
    assert!(matches!(
        scope_query("SELECT * FROM pg_catalog.pg_user", user(), &policy()),
        Err(QueryValidationError::UnsupportedRelation(_))
    ));
}

#[test]
fn given_trailing_semicolon_when_scoping_then_accepted() {
    assert!(scope_query("SELECT COUNT(*) FROM invoices;", user(), &policy()).is_ok());
}
