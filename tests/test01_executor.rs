mod common;

use common::{audit_rows, runtime, setup};
use serde::Deserialize;
use sql_gateway::prelude::*;

#[test]
fn inserts_report_generated_ids_and_reads_report_rows() -> Result<(), Box<dyn std::error::Error>>
{
    let rt = runtime()?;
    rt.block_on(async {
        let db = setup().await?;

        let res = db
            .gateway
            .run_plain(|conn: Conn| async move {
                let first = conn
                    .execute(
                        "INSERT INTO books (title, author) VALUES (?1, ?2)",
                        &[RowValues::Text("Dune".into()), RowValues::Text("Herbert".into())],
                    )
                    .await?;
                let second = conn
                    .execute(
                        "INSERT INTO books (title, author) VALUES (?1, ?2)",
                        &["Emma".into(), "Austen".into()],
                    )
                    .await?;
                let read = conn
                    .execute("SELECT id, title FROM books ORDER BY id", &[])
                    .await?;
                let none = conn
                    .execute("SELECT id FROM books WHERE title = ?1", &["Ulysses".into()])
                    .await?;
                Ok::<_, SqlGatewayError>(vec![first, second, read, none])
            })
            .await;

        let results = res.data().expect("data envelope");
        assert_eq!(results[0].insert_id(), Some(1));
        assert_eq!(results[1].insert_id(), Some(2));

        let rows = results[2].rows().expect("row set");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.results[1].get("title").and_then(|v| v.as_text()), Some("Emma"));
        assert_eq!(results[2].insert_id(), None);

        let empty = results[3].rows().expect("zero-row reads are still row sets");
        assert!(empty.is_empty());

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn writes_without_generated_ids_are_row_sets() -> Result<(), Box<dyn std::error::Error>> {
    let rt = runtime()?;
    rt.block_on(async {
        let db = setup().await?;

        let res = db
            .gateway
            .run_plain(|conn: Conn| async move {
                conn.execute("INSERT INTO books (title) VALUES (?1)", &["Dune".into()])
                    .await?;
                let update = conn
                    .execute(
                        "UPDATE books SET price = ?1 WHERE title = ?2",
                        &[RowValues::Float(9.5), "Dune".into()],
                    )
                    .await?;
                let ignored = conn
                    .execute("INSERT OR IGNORE INTO books (title) VALUES (?1)", &["Dune".into()])
                    .await?;
                let returning = conn
                    .execute(
                        "INSERT INTO books (title) VALUES (?1) RETURNING id, title",
                        &["Emma".into()],
                    )
                    .await?;
                Ok::<_, SqlGatewayError>(vec![update, ignored, returning])
            })
            .await;

        let results = res.data().expect("data envelope");
        assert!(results[0].rows().is_some_and(ResultSet::is_empty));
        assert_eq!(results[1].insert_id(), None, "no row was inserted");
        let returned = results[2].rows().expect("RETURNING yields rows");
        assert_eq!(returned.results[0].get("title").and_then(|v| v.as_text()), Some("Emma"));

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn upserts_report_ids_only_for_new_rows() -> Result<(), Box<dyn std::error::Error>> {
    let rt = runtime()?;
    rt.block_on(async {
        let db = setup().await?;
        let upsert = "INSERT INTO books (title) VALUES (?1) \
                      ON CONFLICT (title) DO UPDATE SET price = 9.0";

        let res = db
            .gateway
            .run_plain(|conn: Conn| async move {
                conn.execute("INSERT INTO books (title) VALUES (?1)", &["Dune".into()])
                    .await?;
                conn.execute(
                    "INSERT INTO payments (id, book_id, amount) VALUES (?1, ?2, ?3)",
                    &[RowValues::Int(42), RowValues::Int(1), RowValues::Float(5.0)],
                )
                .await?;
                let updated = conn.execute(upsert, &["Dune".into()]).await?;
                let inserted = conn.execute(upsert, &["Emma".into()]).await?;
                Ok::<_, SqlGatewayError>(vec![updated, inserted])
            })
            .await;

        let results = res.data().expect("data envelope");
        assert_eq!(results[0].insert_id(), None, "the update path generates no id");
        assert!(results[0].rows().is_some_and(ResultSet::is_empty));
        assert_eq!(results[1].insert_id(), Some(2));

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[derive(Debug, Deserialize, PartialEq)]
struct Book {
    id: i64,
    title: String,
    author: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Payment {
    amount: f64,
    book_id: i64,
}

#[test]
fn typed_reads_decode_or_fail_distinctly() -> Result<(), Box<dyn std::error::Error>> {
    let rt = runtime()?;
    rt.block_on(async {
        let db = setup().await?;

        let res = db
            .gateway
            .run_plain(|conn: Conn| async move {
                conn.execute("INSERT INTO books (title) VALUES (?1)", &["Dune".into()])
                    .await?;
                conn.select_as::<Book>("SELECT id, title, author FROM books", &[])
                    .await
            })
            .await;
        assert_eq!(
            res.data().map(Vec::as_slice),
            Some(
                &[Book {
                    id: 1,
                    title: "Dune".into(),
                    author: None
                }][..]
            )
        );

        let res = db
            .gateway
            .run_plain(|conn: Conn| async move {
                conn.select_as::<Payment>("SELECT id, title FROM books", &[])
                    .await
            })
            .await;
        let message = res.error().expect("decode failure is an error envelope");
        assert!(message.starts_with("Row decoding error"), "{message}");

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn only_non_select_statements_are_audited() -> Result<(), Box<dyn std::error::Error>> {
    let rt = runtime()?;
    rt.block_on(async {
        let db = setup().await?;
        let before = audit_rows(&db.gateway).await.len();

        let res = db
            .gateway
            .run_plain(|conn: Conn| async move {
                conn.execute(
                    "INSERT INTO books (title, author) VALUES (?1, ?2)",
                    &["Dune".into(), RowValues::Null],
                )
                .await?;
                conn.select("SELECT * FROM books", &[]).await?;
                conn.select("  select count(*) AS n FROM books", &[]).await?;
                conn.execute("DELETE FROM books WHERE title = ?1", &["Dune".into()])
                    .await?;
                Ok::<_, SqlGatewayError>("done")
            })
            .await;
        assert_eq!(res.message(), Some("done"));

        let rows = audit_rows(&db.gateway).await;
        let new: Vec<_> = rows[before..].to_vec();
        assert_eq!(new.len(), 2, "{new:?}");
        assert_eq!(new[0].query, "INSERT INTO books (title, author) VALUES (?1, ?2)");
        assert_eq!(new[0].args, r#"["Dune",null]"#);
        assert_eq!(new[0].error, 0);
        assert_eq!(new[0].id.len(), 20);
        assert!(new[0].date > 0);
        assert!(new[1].query.starts_with("DELETE FROM books"));

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn failed_plain_statement_is_audited_as_errored() -> Result<(), Box<dyn std::error::Error>> {
    let rt = runtime()?;
    rt.block_on(async {
        let db = setup().await?;

        let res = db
            .gateway
            .run_plain(|conn: Conn| async move {
                conn.execute("INSERT INTO no_such_table (x) VALUES (?1)", &[RowValues::Int(1)])
                    .await
            })
            .await;
        assert!(res.is_error());

        let rows = audit_rows(&db.gateway).await;
        let last = rows.last().expect("failed statement still logged");
        assert!(last.query.contains("no_such_table"));
        assert_eq!(last.error, 1);
        assert_eq!(db.gateway.audit().stats().failed, 0);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
