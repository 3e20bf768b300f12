use std::fmt::Display;

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::{ASCII_MARKDOWN, UTF8_FULL_CONDENSED};
use comfy_table::{CellAlignment, ContentArrangement, Table};

/// How command output tables are drawn.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TableStyle {
    /// Rounded UTF-8 box for terminals.
    #[default]
    Terminal,
    /// GitHub-flavored Markdown, for pasting into docs.
    Markdown,
}

impl TableStyle {
    pub fn markdown_if(markdown: bool) -> Self {
        if markdown {
            TableStyle::Markdown
        } else {
            TableStyle::Terminal
        }
    }
}

/// Renders `rows` under `headers`. Columns listed in `count_columns` hold row
/// or column counts and are right-aligned.
pub fn render_table<T, U, V, W>(
    style: TableStyle,
    headers: T,
    rows: U,
    count_columns: &[usize],
) -> String
where
    T: IntoIterator,
    T::Item: AsRef<str> + Display,
    U: IntoIterator<Item = V>,
    V: IntoIterator<Item = W>,
    W: AsRef<str> + Display,
{
    let mut table = Table::new();
    match style {
        TableStyle::Terminal => {
            table
                .load_preset(UTF8_FULL_CONDENSED)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_content_arrangement(ContentArrangement::Dynamic);
        }
        TableStyle::Markdown => {
            // wrapped cells would break markdown rows
            table
                .load_preset(ASCII_MARKDOWN)
                .set_content_arrangement(ContentArrangement::Disabled);
        }
    }
    table.set_header(headers);
    table.add_rows(rows);
    for index in count_columns {
        if let Some(column) = table.column_mut(*index) {
            column.set_cell_alignment(CellAlignment::Right);
        }
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(style: TableStyle) -> String {
        render_table(
            style,
            ["table", "rows"],
            vec![vec!["register_entries", "3"], vec!["register_entries_tags", "17"]],
            &[1],
        )
    }

    #[test]
    fn test_terminal_table_contains_cells() {
        let rendered = sample(TableStyle::Terminal);
        assert!(rendered.contains("register_entries_tags"));
        assert!(rendered.contains('╭'));
    }

    #[test]
    fn test_markdown_table_right_aligns_counts() {
        let rendered = sample(TableStyle::markdown_if(true));
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|l| l.starts_with('|')));
        assert!(lines[2].ends_with("|    3 |"), "{}", lines[2]);
    }

    #[test]
    fn test_out_of_range_count_column_is_ignored() {
        let rendered = render_table(TableStyle::Markdown, ["a"], vec![vec!["x"]], &[4]);
        assert!(rendered.contains("| x |"));
    }
}
