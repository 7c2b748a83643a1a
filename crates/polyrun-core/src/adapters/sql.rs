//! SQLite runtime adapter over an embedded in-memory database.

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection, InterruptHandle};
use std::sync::{Arc, Mutex};

use crate::core_types::GuestLanguage;
use crate::host::{GuestFailure, HostSink, RunRequest, RuntimeAdapter};

#[derive(Debug, Clone, PartialEq)]
struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Interrupts the statement running on the blocking pool if the run future is
/// dropped before it finishes.
struct InterruptGuard {
    handle: Option<InterruptHandle>,
}

impl InterruptGuard {
    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            log::debug!("Interrupting running SQL statement");
            handle.interrupt();
        }
    }
}

#[derive(Default)]
pub struct SqlAdapter {
    connection: Option<Arc<Mutex<Connection>>>,
}

impl SqlAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(text) => String::from_utf8_lossy(text).to_string(),
        ValueRef::Blob(bytes) => bytes
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(","),
    }
}

fn format_result_sets(sets: &[ResultSet]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for set in sets {
        let widths: Vec<usize> = set
            .columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                set.rows
                    .iter()
                    .map(|row| row[i].chars().count())
                    .chain(std::iter::once(column.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let pad = |cells: &[String]| {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
                .collect::<Vec<_>>()
                .join(" | ")
        };

        lines.push(pad(&set.columns));
        lines.push(
            widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
        for row in &set.rows {
            lines.push(pad(row));
        }
        let count = set.rows.len();
        lines.push(format!("({} row{})", count, if count == 1 { "" } else { "s" }));
        lines.push(String::new());
    }
    lines.join("\n").trim().to_string()
}

/// Executes every statement of `sql` in order. Statements returning rows
/// contribute a result set when they produced at least one row.
fn execute_batch(conn: &Connection, sql: &str) -> rusqlite::Result<String> {
    let mut sets = Vec::new();
    let mut batch = Batch::new(conn, sql);
    while let Some(mut stmt) = batch.next()? {
        if stmt.column_count() == 0 {
            stmt.execute([])?;
            continue;
        }
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                cells.push(render_value(row.get_ref(i)?));
            }
            rows.push(cells);
        }
        if !rows.is_empty() {
            sets.push(ResultSet { columns, rows });
        }
    }

    if !sets.is_empty() {
        return Ok(format_result_sets(&sets));
    }
    let changes = conn.changes();
    let mut message = "Query executed successfully.".to_string();
    if changes > 0 {
        message.push_str(&format!(
            " {} row{} affected.",
            changes,
            if changes == 1 { "" } else { "s" }
        ));
    }
    Ok(message)
}

#[async_trait]
impl RuntimeAdapter for SqlAdapter {
    fn language(&self) -> GuestLanguage {
        GuestLanguage::Sql
    }

    /// Every boot starts from an empty database.
    async fn boot(&mut self, sink: &HostSink) -> Result<(), String> {
        sink.loading("Loading SQLite runtime...");
        self.connection = None;
        let connection = Connection::open_in_memory()
            .map_err(|e| format!("Failed to open SQLite database: {}", e))?;
        log::info!("SQLite {} ready", rusqlite::version());
        self.connection = Some(Arc::new(Mutex::new(connection)));
        Ok(())
    }

    async fn run(&mut self, request: RunRequest, _sink: &HostSink) -> Result<String, GuestFailure> {
        let Some(connection) = self.connection.clone() else {
            return Err(GuestFailure::new("SQLite runtime is not loaded. Please retry loading."));
        };
        let handle = connection
            .lock()
            .map_err(|_| GuestFailure::new("SQLite connection is unavailable"))?
            .get_interrupt_handle();
        let mut guard = InterruptGuard {
            handle: Some(handle),
        };

        let code = request.code;
        let outcome = tokio::task::spawn_blocking(move || {
            let conn = connection
                .lock()
                .map_err(|_| "SQLite connection is unavailable".to_string())?;
            execute_batch(&conn, &code).map_err(|e| e.to_string())
        })
        .await;
        guard.disarm();

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(message)) => Err(GuestFailure::new(message)),
            Err(join_err) => Err(GuestFailure::new(format!("SQL execution failed: {}", join_err))),
        }
    }
}
