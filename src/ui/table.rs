use crate::item::ClassSummary;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Tabled)]
struct ClassRow<'a> {
    #[tabled(rename = "Class")]
    class: &'a str,
    #[tabled(rename = "Items")]
    items: usize,
    #[tabled(rename = "Roots")]
    roots: usize,
    #[tabled(rename = "Fields")]
    fields: usize,
    #[tabled(rename = "Relations")]
    relations: usize,
}

/// Two-column metric table
#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: impl ToString) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &[(&str, String)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

/// One row per item class of a dump
pub fn class_table(summaries: &[ClassSummary]) -> String {
    if summaries.is_empty() {
        return String::new();
    }
    let rows: Vec<ClassRow> = summaries
        .iter()
        .map(|s| ClassRow {
            class: &s.class,
            items: s.items,
            roots: s.roots,
            fields: s.fields,
            relations: s.relations,
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}
