use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

static TABLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static CELL_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td, th").unwrap());

/// A single `<tr>`, flattened to text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    /// All text of the row, pieces joined by a single space.
    pub text: String,
    pub cells: Vec<String>,
}

impl Row {
    #[cfg(test)]
    pub fn from_cells(cells: &[&str]) -> Self {
        Row {
            text: normalize(&cells.join(" ")),
            cells: cells.iter().map(|c| normalize(c)).collect(),
        }
    }
}

/// Parse markup and return the rows of every table, tables in document order.
pub fn extract_tables(markup: &str) -> Vec<Vec<Row>> {
    let document = Html::parse_document(markup);
    document
        .select(&TABLE_SEL)
        .map(|table| {
            table
                .select(&ROW_SEL)
                .filter(|tr| owning_table(*tr).is_some_and(|t| t.id() == table.id()))
                .map(to_row)
                .collect()
        })
        .collect()
}

/// Nearest enclosing `<table>`; a row of a nested table belongs to the inner one.
fn owning_table(tr: ElementRef<'_>) -> Option<ElementRef<'_>> {
    tr.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "table")
}

fn to_row(tr: ElementRef<'_>) -> Row {
    let text = join_text(tr);
    let cells = tr
        .select(&CELL_SEL)
        .filter(|cell| owning_row(*cell).is_some_and(|r| r.id() == tr.id()))
        .map(join_text)
        .collect();
    Row { text, cells }
}

fn owning_row(cell: ElementRef<'_>) -> Option<ElementRef<'_>> {
    cell.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "tr")
}

fn join_text(el: ElementRef<'_>) -> String {
    let pieces: Vec<&str> = el.text().map(str::trim).filter(|t| !t.is_empty()).collect();
    normalize(&pieces.join(" "))
}

/// Collapse whitespace runs (including NBSP, common in exported reports).
fn normalize(s: &str) -> String {
    s.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
