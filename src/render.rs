//! Rendering of a [`ResultBuilder`] as HTML, JSON, XML or plain text.
//!
//! All renderers show the same information; the tables in creation order, each
//! with all it's rows. The format is picked from the extension of the request path.

use crate::prelude::*;
use crate::result::{Message, Table};
use std::fmt::Write as _;
use hearth_utils::escape_markup;

/// The output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// A styled page.
    #[default]
    Html,
    /// A object of tables.
    Json,
    /// A element tree.
    Xml,
    /// `;`-delimited blocks.
    Plain,
}
impl Format {
    /// Picks the format from the extension of the request path (including the dot).
    ///
    /// Unknown and missing extensions give [`Format::Html`].
    #[must_use]
    pub fn from_extension(extension: Option<&str>) -> Self {
        match extension.map(str::to_ascii_lowercase).as_deref() {
            Some(".json") => Self::Json,
            Some(".xml") => Self::Xml,
            Some(".txt" | ".text") => Self::Plain,
            _ => Self::Html,
        }
    }
    /// The `content-type` of this format.
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=utf-8",
            Self::Json => "application/json",
            Self::Xml => "application/xml; charset=utf-8",
            Self::Plain => "text/plain; charset=utf-8",
        }
    }
}

/// Renders `result` in `format`.
///
/// `path` is the request path, for the breadcrumb of the HTML page.
#[must_use]
pub fn render(
    result: &ResultBuilder,
    format: Format,
    path: &str,
    server_name: &str,
    transmit_layout: bool,
) -> Bytes {
    match format {
        Format::Html => html(result, path, server_name),
        Format::Json => json(result, transmit_layout),
        Format::Xml => xml(result, transmit_layout),
        Format::Plain => plain(result),
    }
}

const STYLE: &str = "\
body{font-family:sans-serif;margin:0 auto;max-width:60em;padding:1em;color:#222}\
nav{font-size:.9em;margin-bottom:1em}nav a{color:#2a5db0;text-decoration:none}\
.banner{padding:.6em 1em;border-radius:4px;margin-bottom:1em;background:#e3f2e1}\
.banner.error{background:#f8e0e0}\
table{border-collapse:collapse;margin-bottom:1.5em;width:100%}\
caption{text-align:left;font-weight:bold;padding:.3em 0}\
th,td{border:1px solid #ccc;padding:.3em .6em;text-align:left}th{background:#f2f2f2}";

fn breadcrumb(output: &mut String, path: &str) {
    output.push_str("<nav><a href=\"/\">/</a>");
    let mut href = String::with_capacity(path.len());
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        href.push('/');
        href.push_str(segment);
        let _ = write!(
            output,
            " <a href=\"{}\">{}</a> /",
            escape_markup(&href),
            escape_markup(segment)
        );
    }
    output.push_str("</nav>");
}
fn banner(output: &mut String, message: Option<&Message>) {
    let Some(message) = message else { return };
    let class = if message.kind == ErrorKind::None {
        "banner"
    } else {
        "banner error"
    };
    let _ = write!(
        output,
        "<div class=\"{class}\"><strong>{} {}</strong> {}</div>",
        message.status.as_u16(),
        message.status.canonical_reason().unwrap_or(""),
        escape_markup(&message.text)
    );
}
fn html_table(output: &mut String, name: &str, table: &Table) {
    let _ = write!(output, "<table><caption>{}</caption><tr>", escape_markup(name));
    for field in table.layout().fields {
        let _ = write!(output, "<th>{}</th>", escape_markup(field));
    }
    output.push_str("</tr>");
    for row in table.rows() {
        output.push_str("<tr>");
        for cell in row {
            let _ = write!(output, "<td>{}</td>", escape_markup(&cell.to_string()));
        }
        output.push_str("</tr>");
    }
    output.push_str("</table>");
}

/// Renders a HTML page with a breadcrumb of `path`, a status banner and one `<table>` per table.
#[must_use]
pub fn html(result: &ResultBuilder, path: &str, server_name: &str) -> Bytes {
    let mut output = String::with_capacity(1024);
    let title = result.message().map_or_else(
        || path.to_compact_string(),
        |message| format_compact!("{} {}", message.status.as_u16(), path),
    );
    let _ = write!(
        output,
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{} - {}</title><style>{STYLE}</style></head><body>",
        escape_markup(&title),
        escape_markup(server_name),
    );
    breadcrumb(&mut output, path);
    banner(&mut output, result.message());
    for (name, table) in result.tables() {
        html_table(&mut output, name, table);
    }
    output.push_str("</body></html>");
    Bytes::from(output)
}

fn json_layout(table: &Table) -> serde_json::Value {
    serde_json::json!({
        "name": table.layout().name,
        "fields": table.layout().fields,
        "key": table.layout().key_name(),
    })
}
/// Renders one object per table, keyed by the table names.
///
/// Each table object has it's `rows`, preceded by it's `layout` if `transmit_layout`.
#[must_use]
pub fn json(result: &ResultBuilder, transmit_layout: bool) -> Bytes {
    let mut root = serde_json::Map::new();
    for (name, table) in result.tables() {
        let mut object = serde_json::Map::new();
        if transmit_layout {
            object.insert("layout".to_owned(), json_layout(table));
        }
        let rows = table
            .rows()
            .iter()
            .map(|row| {
                let fields = table.layout().fields.iter();
                let map: serde_json::Map<_, _> = fields
                    .zip(row)
                    .map(|(field, cell)| ((*field).to_owned(), cell.to_json()))
                    .collect();
                serde_json::Value::Object(map)
            })
            .collect();
        object.insert("rows".to_owned(), serde_json::Value::Array(rows));
        root.insert(name.to_owned(), serde_json::Value::Object(object));
    }
    // serializing a `Value` can't fail; it only contains string keys
    serde_json::to_vec(&serde_json::Value::Object(root))
        .map_or_else(|_| Bytes::from_static(b"{}"), Bytes::from)
}

/// Renders a element tree. Each row carries it's primary key as a `id` attribute.
#[must_use]
pub fn xml(result: &ResultBuilder, transmit_layout: bool) -> Bytes {
    let mut output = String::with_capacity(512);
    let _ = write!(
        output,
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><result status=\"{}\">",
        result.status().as_u16()
    );
    for (name, table) in result.tables() {
        let layout = table.layout();
        let _ = write!(
            output,
            "<table name=\"{}\" key=\"{}\">",
            escape_markup(name),
            escape_markup(layout.key_name())
        );
        if transmit_layout {
            output.push_str("<layout>");
            for field in layout.fields {
                let _ = write!(output, "<field>{}</field>", escape_markup(field));
            }
            output.push_str("</layout>");
        }
        for row in table.rows() {
            let key = row.get(layout.key).map(ToString::to_string).unwrap_or_default();
            let _ = write!(output, "<row id=\"{}\">", escape_markup(&key));
            for (field, cell) in layout.fields.iter().zip(row) {
                let _ = write!(
                    output,
                    "<cell name=\"{}\">{}</cell>",
                    escape_markup(field),
                    escape_markup(&cell.to_string())
                );
            }
            output.push_str("</row>");
        }
        output.push_str("</table>");
    }
    output.push_str("</result>");
    Bytes::from(output)
}

fn plain_cell(output: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            ';' => output.push_str("\\;"),
            '\\' => output.push_str("\\\\"),
            '\n' => output.push_str("\\n"),
            '\r' => {}
            c => output.push(c),
        }
    }
}
/// Renders one block per table: the table name, the field names and then one line per row.
/// Cells are delimited by `;`. Blocks are separated by an empty line.
#[must_use]
pub fn plain(result: &ResultBuilder) -> Bytes {
    let mut output = String::with_capacity(256);
    for (index, (name, table)) in result.tables().enumerate() {
        if index != 0 {
            output.push('\n');
        }
        plain_cell(&mut output, name);
        output.push('\n');
        output.push_str(&table.layout().fields.join(";"));
        output.push('\n');
        for row in table.rows() {
            for (index, cell) in row.iter().enumerate() {
                if index != 0 {
                    output.push(';');
                }
                plain_cell(&mut output, &cell.to_string());
            }
            output.push('\n');
        }
    }
    Bytes::from(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::tests::User;

    fn duplicated() -> ResultBuilder {
        let mut result = ResultBuilder::new();
        let user = User {
            id: 7,
            name: "<admin>",
        };
        result.add_struct(&user).unwrap().add_struct(&user).unwrap();
        result
    }

    #[test]
    fn formats() {
        assert_eq!(Format::from_extension(Some(".json")), Format::Json);
        assert_eq!(Format::from_extension(Some(".XML")), Format::Xml);
        assert_eq!(Format::from_extension(Some(".txt")), Format::Plain);
        assert_eq!(Format::from_extension(Some(".text")), Format::Plain);
        assert_eq!(Format::from_extension(Some(".css")), Format::Html);
        assert_eq!(Format::from_extension(None), Format::Html);
    }

    #[test]
    fn one_row_in_every_format() {
        let result = duplicated();

        let html = html(&result, "/users/list", "hearth");
        let html = str::from_utf8(&html).unwrap();
        assert_eq!(html.matches("<td>7</td>").count(), 1);
        assert!(html.contains("&lt;admin&gt;"));
        assert!(html.contains("<a href=\"/users\">users</a>"));

        let json = json(&result, false);
        let json: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(json["Users"]["rows"].as_array().unwrap().len(), 1);
        assert_eq!(json["Users"]["rows"][0]["name"], "<admin>");
        assert!(json["Users"].get("layout").is_none());

        let xml = xml(&result, false);
        let xml = str::from_utf8(&xml).unwrap();
        assert_eq!(xml.matches("<row ").count(), 1);
        assert!(xml.contains("<row id=\"7\">"));

        let plain = plain(&result);
        let plain = str::from_utf8(&plain).unwrap();
        assert_eq!(plain, "Users\nid;name\n7;<admin>\n");
    }

    #[test]
    fn layout_transmission() {
        let result = duplicated();
        let json = json(&result, true);
        let text = str::from_utf8(&json).unwrap();
        // the layout precedes the rows
        assert!(text.find("\"layout\"").unwrap() < text.find("\"rows\"").unwrap());
        let json: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(json["Users"]["layout"]["key"], "id");
        assert_eq!(json["Users"]["layout"]["fields"][1], "name");

        let xml = xml(&result, true);
        assert!(str::from_utf8(&xml)
            .unwrap()
            .contains("<layout><field>id</field><field>name</field></layout>"));
    }

    #[test]
    fn messages_and_status() {
        let mut result = ResultBuilder::new();
        result.add_error(&Error::not_found("no route"));

        let html = html(&result, "/", "hearth");
        let html = str::from_utf8(&html).unwrap();
        assert!(html.contains("banner error"));
        assert!(html.contains("404 Not Found"));

        let xml = xml(&result, false);
        assert!(str::from_utf8(&xml)
            .unwrap()
            .starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?><result status=\"404\">"));

        let plain = plain(&result);
        assert_eq!(
            str::from_utf8(&plain).unwrap(),
            "Messages\nid;status;kind;text\n1;404;NotFound;no route\n"
        );
    }
}
